//! vmruntime - entry point
//!
//! Serves the configured routes, `/_ah/health` and `/_ah/stop`. Programs
//! that provide application handlers call [`vmruntime::run`] with their own
//! registry instead.

use std::path::PathBuf;

use vmruntime::server::HandlerRegistry;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("vmruntime {}", vmruntime::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"vmruntime - legacy App Engine application runtime

USAGE:
    vmruntime [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    VMRUNTIME__<SECTION>__<KEY>    Override any configuration key
                                   (e.g. VMRUNTIME__SERVER__HTTP_ADDR=0.0.0.0:9000)
    GAE_LONG_APP_ID                Application id
    GAE_PARTITION                  Application id partition
    GAE_MODULE_NAME                Module name
    GAE_MODULE_VERSION             Major version
    GAE_MINOR_VERSION              Minor version
    GAE_MODULE_INSTANCE            Instance id
    GAE_APPENGINE_HOSTNAME         Hostname used for login redirects
    API_HOST, API_PORT             Service bridge location

EXAMPLES:
    vmruntime --config /etc/vmruntime/vmruntime.toml
    VMRUNTIME__API__DISPATCH=sync vmruntime
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = vmruntime::load_config(args.config.as_deref())?;
    vmruntime::run(config, HandlerRegistry::new()).await
}
