use std::process;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use hostprep::cli::{self, Commands};
use hostprep::executor::RealCommandExecutor;
use hostprep::report::SummaryReporter;

fn main() -> Result<()> {
    let args = cli::parse_args()?;
    hostprep::init_logging(args.command.log_level())?;

    match &args.command {
        Commands::Apply(opts) => {
            let executor = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            let report = match hostprep::run_apply(opts, std::env::vars(), executor) {
                Ok(report) => report,
                Err(e) => {
                    error!("{:#}", e);
                    process::exit(1);
                }
            };
            let summary = SummaryReporter::render(&report);
            if report.is_success() {
                print!("{}", summary);
            } else {
                eprint!("{}", summary);
                error!("provisioning {}", report.status);
                process::exit(1);
            }
        }
        Commands::Validate(opts) => match hostprep::run_validate(opts, std::env::vars()) {
            Ok(plan) => print!("{}", plan),
            Err(e) => {
                error!("{:#}", e);
                process::exit(1);
            }
        },
        Commands::Tunnel(opts) => {
            let executor = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            match hostprep::run_tunnel(opts, std::env::vars(), executor) {
                Ok(outcome) => {
                    info!("server public key: {}", outcome.server_public_key);
                    info!("client public key: {}", outcome.client_public_key);
                    println!("server config: {}", outcome.server_config);
                    println!("client config: {}", outcome.client_config);
                    println!("copy the client config to the peer host and run `wg-quick up` there");
                }
                Err(e) => {
                    error!("{:#}", e);
                    process::exit(1);
                }
            }
        }
        Commands::Completions(opts) => hostprep::print_completions(opts.shell),
    }

    Ok(())
}
