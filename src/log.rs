//! Logging shims over `flashlog`.
//!
//! flashlog formats records on its logger thread, so every argument has to be owned.
//! Call sites format eagerly and hand over a `String`.

use flashlog::{flash_debug, flash_error, flash_warn};

pub(crate) fn debug(msg: String) {
    flash_debug!("unisocket"; "{}", msg);
}

pub(crate) fn warn(msg: String) {
    flash_warn!("unisocket"; "{}", msg);
}

pub(crate) fn error(msg: String) {
    flash_error!("unisocket"; "{}", msg);
}
