use std::env;

use offline_shim::cli;

#[tokio::main]
async fn main() -> offline_shim::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let args = match cli::parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            cli::print_usage();
            std::process::exit(2);
        }
    };

    cli::run(args).await
}
