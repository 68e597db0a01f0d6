use clap::Parser;
use sift_cli::{CliArgs, SiftApp};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let app = match SiftApp::from_args(&args) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("sift: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run(args).await {
        eprintln!("sift: {e}");
        std::process::exit(1);
    }
}
