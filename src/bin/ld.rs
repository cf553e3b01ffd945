use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    info!("launched with {} arguments", args.len());

    let opt = match cold::opt::parse_opts(&args) {
        Ok(opt) => opt,
        Err(e) => {
            error!("argument error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cold::driver::link(opt) {
        error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}
