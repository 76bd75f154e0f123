// src/main.rs
use std::env;
use std::fs;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use flashlog::{LogLevel, Logger};
use unisocket::{AddressFamily, Endpoint, EndpointOptions, Protocol, SocketType};

const DEFAULT_PORT: u16 = 5003;
const MESSAGE_COUNT: usize = 10_000;
const POLL_INTERVAL_MICROS: u32 = 200_000;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: {} [server|client] [host] [port] [options.json]", args[0]);
        println!("  Default: 127.0.0.1:{}", DEFAULT_PORT);
        process::exit(1);
    }

    let _logger = Logger::initialize()
        .with_console_report(true)
        .with_max_log_level(LogLevel::Info)
        .launch();

    let mode = &args[1];
    let host = args.get(2).map(|s| s.as_str()).unwrap_or("127.0.0.1");
    let port: u16 = args.get(3).map(|s| s.parse().unwrap_or(DEFAULT_PORT)).unwrap_or(DEFAULT_PORT);
    let options = match args.get(4) {
        Some(path) => load_options(path),
        None => EndpointOptions::low_latency(),
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        println!("Received termination signal, shutting down...");
    }) {
        println!("Failed to install Ctrl-C handler: {}", e);
        process::exit(1);
    }

    match mode.as_str() {
        "server" => run_server(running, port, &options),
        "client" => run_client(running, host, port, &options),
        _ => {
            println!("Unknown mode: {}", mode);
            println!("Use 'server' or 'client'");
            process::exit(1);
        }
    }
}

fn load_options(path: &str) -> EndpointOptions {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            println!("Failed to read {}: {}", path, e);
            process::exit(1);
        }
    };
    match EndpointOptions::from_json(&text) {
        Ok(options) => options,
        Err(e) => {
            println!("Failed to parse {}: {}", path, e);
            process::exit(1);
        }
    }
}

fn run_server(running: Arc<AtomicBool>, port: u16, options: &EndpointOptions) {
    let mut listener = Endpoint::new(AddressFamily::Ipv4, SocketType::Stream, Protocol::Tcp);
    if !listener.is_valid() {
        println!("Failed to create socket");
        return;
    }
    listener.set_reuseaddr(true);
    if !listener.bind(port) || !listener.listen() {
        println!("Failed to listen on port {}", port);
        return;
    }
    // Lets the accept loop notice Ctrl-C.
    listener.set_rx_timeout(POLL_INTERVAL_MICROS);

    println!("Echo server listening on port {}", port);

    while running.load(Ordering::SeqCst) {
        let (mut client, peer) = listener.accept_with_peer();
        if !client.is_valid() {
            continue;
        }
        if let Some(peer) = peer {
            println!("Client connected from {}", peer);
        }

        client.apply_options(options);
        client.set_rx_timeout(POLL_INTERVAL_MICROS);

        let mut echoed = 0u64;
        while running.load(Ordering::SeqCst) {
            match client.try_recv_pascal_string() {
                Ok(msg) => {
                    if !client.send_pascal_string(&msg) {
                        break;
                    }
                    echoed += 1;
                }
                Err(e) if e.is_timeout() => {
                    // A timeout in the middle of a frame leaves the stream misaligned.
                    let discarded = client.flush_rx_buffer();
                    if discarded > 0 {
                        println!("Dropping client after a partial frame ({} bytes discarded)", discarded);
                        break;
                    }
                }
                Err(e) => {
                    if !e.is_disconnect() {
                        println!("Client read error: {}", e);
                    }
                    break;
                }
            }
        }
        println!("Client disconnected after {} messages", echoed);
    }
}

fn run_client(running: Arc<AtomicBool>, host: &str, port: u16, options: &EndpointOptions) {
    let mut sock = Endpoint::new(AddressFamily::Ipv4, SocketType::Stream, Protocol::Tcp);
    sock.apply_options(options);
    if !sock.connect(host, port) {
        println!("Failed to connect to {}:{}", host, port);
        return;
    }

    println!("Connected to {}:{}, sending {} messages", host, port, MESSAGE_COUNT);

    let start_time = Instant::now();
    let mut reply = String::new();
    let mut completed = 0usize;
    for i in 0..MESSAGE_COUNT {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let msg = format!("ping {}", i);
        if !sock.send_pascal_string(&msg) || !sock.recv_pascal_string(&mut reply) {
            println!("Connection lost after {} messages", completed);
            break;
        }
        if reply != msg {
            println!("Mismatched echo: sent {:?}, got {:?}", msg, reply);
            break;
        }
        completed += 1;
    }

    let elapsed = start_time.elapsed().as_secs_f64();
    println!("\n====== Results ======");
    println!("Round trips: {}", completed);
    println!("Round trips per second: {:.2}", completed as f64 / elapsed);
    println!("Mean RTT: {:.2} us", elapsed * 1_000_000.0 / completed.max(1) as f64);
}
