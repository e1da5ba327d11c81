use std::env;
use std::process;
use std::sync::Arc;

use getopts::Options;
use tracing_subscriber::EnvFilter;

use transfer_endpoint::dns::config::Config;
use transfer_endpoint::dns::context::ServerContext;
use transfer_endpoint::dns::provider::JsonFileProvider;
use transfer_endpoint::dns::server::{DnsServer, DnsTcpServer, DnsUdpServer};
use transfer_endpoint::dns::store::JsonFileStore;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn fail(message: String) -> ! {
    log::error!("{}", message);
    process::exit(1);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "c",
        "config",
        "Path to the configuration file",
        "FILE",
    );
    opts.optopt(
        "a",
        "address",
        "Address to listen on, overrides the configuration file",
        "ADDRESS",
    );
    opts.optopt(
        "p",
        "port",
        "Port to listen on, overrides the configuration file",
        "PORT",
    );

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, opts);
            process::exit(2);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let config_path = opt_matches
        .opt_str("c")
        .unwrap_or_else(|| "transfer-endpoint.toml".to_string());

    let mut config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => fail(format!("{}: {}", config_path, e)),
    };

    if let Some(address) = opt_matches.opt_str("a") {
        config.address = address;
    }

    if let Some(port) = opt_matches.opt_str("p") {
        config.port = match port.parse() {
            Ok(port) => port,
            Err(e) => fail(format!("Invalid port {}: {}", port, e)),
        };
    }

    log::info!(
        "Serving zones from {} with state in {}",
        config.data_file.display(),
        config.state_file.display()
    );

    let provider = Arc::new(JsonFileProvider::new(&config.data_file));
    let store = match JsonFileStore::open(&config.state_file) {
        Ok(store) => Arc::new(store),
        Err(e) => fail(format!("Failed to open state file: {}", e)),
    };

    let udp_threads = config.udp_threads;
    let context = match ServerContext::initialize(config, provider.clone(), store) {
        Ok(context) => Arc::new(context),
        Err(e) => fail(format!("Failed to initialize: {}", e)),
    };

    if let Err(e) = provider.watch(&context) {
        fail(format!("Failed to read zone data: {}", e));
    }

    let udp_server = DnsUdpServer::new(context.clone(), udp_threads);
    if let Err(e) = udp_server.run_server() {
        fail(format!("Failed to bind UDP listener: {}", e));
    }

    let tcp_server = DnsTcpServer::new(context.clone());
    if let Err(e) = tcp_server.run_server() {
        fail(format!("Failed to bind TCP listener: {}", e));
    }

    loop {
        std::thread::park();
    }
}
