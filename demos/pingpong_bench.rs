use std::env;
use std::process;
use std::thread;

use flashlog::get_unix_nano;
use unisocket::{AddressFamily, Endpoint, EndpointOptions, Protocol, SocketType};

const ITERATIONS: usize = 10000;
const WARMUP: usize = 1000;

fn main() {
    let args: Vec<String> = env::args().collect();
    let payload_size: usize = args.get(1).map(|s| s.parse().unwrap_or(64)).unwrap_or(64);

    println!("=== Pascal String Ping-Pong Benchmark ({} byte payload) ===", payload_size);

    benchmark_with_options("Low Latency", EndpointOptions::low_latency(), payload_size);
    benchmark_with_options("Bulk Transfer", EndpointOptions::bulk_transfer(), payload_size);
    benchmark_with_options("OS Defaults", EndpointOptions::default(), payload_size);
}

fn benchmark_with_options(config_name: &str, options: EndpointOptions, payload_size: usize) {
    println!("\n--- {} Configuration ---", config_name);

    let mut listener = Endpoint::new(AddressFamily::Ipv4, SocketType::Stream, Protocol::Tcp);
    if !listener.bind(0) || !listener.listen() {
        println!("Failed to set up listener");
        process::exit(1);
    }
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            println!("Failed to read listener address: {}", e);
            process::exit(1);
        }
    };

    let echo_options = options.clone();
    let echo = thread::spawn(move || {
        core_affinity::set_for_current(core_affinity::CoreId { id: 1 });

        let mut peer = listener.accept();
        peer.apply_options(&echo_options);
        let mut buf = Vec::new();
        while peer.recv_pascal_bytes(&mut buf) {
            if !peer.send_pascal_bytes(&buf) {
                break;
            }
        }
    });

    core_affinity::set_for_current(core_affinity::CoreId { id: 0 });

    let mut sock = Endpoint::new(AddressFamily::Ipv4, SocketType::Stream, Protocol::Tcp);
    sock.apply_options(&options);
    if !sock.connect("127.0.0.1", port) {
        println!("Failed to connect");
        process::exit(1);
    }

    let payload = vec![b'A'; payload_size];
    let mut reply = Vec::with_capacity(payload_size);

    println!("Warming up...");
    for _ in 0..WARMUP {
        sock.send_pascal_bytes(&payload);
        sock.recv_pascal_bytes(&mut reply);
    }

    println!("Starting benchmark ({} iterations)...", ITERATIONS);
    let mut latencies = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let start = get_unix_nano();
        if !sock.send_pascal_bytes(&payload) || !sock.recv_pascal_bytes(&mut reply) {
            println!("Connection lost");
            break;
        }
        latencies.push(get_unix_nano() - start);
    }

    sock.close();
    let _ = echo.join();

    if latencies.is_empty() {
        return;
    }
    latencies.sort_unstable();
    let total: u64 = latencies.iter().sum();
    let pct = |p: f64| latencies[((latencies.len() - 1) as f64 * p) as usize];

    println!("Average RTT: {:.2} us", total as f64 / latencies.len() as f64 / 1000.0);
    println!("Min RTT: {:.2} us", latencies[0] as f64 / 1000.0);
    println!("P50 RTT: {:.2} us", pct(0.50) as f64 / 1000.0);
    println!("P99 RTT: {:.2} us", pct(0.99) as f64 / 1000.0);
    println!("Max RTT: {:.2} us", latencies[latencies.len() - 1] as f64 / 1000.0);
}
