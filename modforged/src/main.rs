use std::path::PathBuf;

use modforged::session::{SessionConfig, SessionRuntime};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    Tree,
    Ask(String),
    Repos,
    Import { file: PathBuf, into: String },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    let mut into = None;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tree" => mode = CliMode::Tree,
            "--repos" => mode = CliMode::Repos,
            "--import" => {
                let file = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--import requires a file"))?;
                mode = CliMode::Import {
                    file: PathBuf::from(file),
                    into: String::new(),
                };
            }
            "--into" => {
                into = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--into requires a directory"))?,
                );
            }
            "--ask" => {
                let message = args
                    .next()
                    .filter(|message| !message.trim().is_empty())
                    .ok_or_else(|| anyhow::anyhow!("--ask requires a message"))?;
                mode = CliMode::Ask(message);
            }
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    match (&mut mode, into) {
        (CliMode::Import { into, .. }, Some(dir)) => *into = dir,
        (_, Some(_)) => anyhow::bail!("--into only applies to --import"),
        (_, None) => {}
    }
    Ok(mode)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modforged=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: modforged [--tree | --repos | --ask <message> | --import <file> [--into <dir>]]");
        println!("  --tree           Print the repository tree and exit");
        println!("  --repos          List your repositories, most recently updated first");
        println!("  --ask <message>  Send one message to the assistant, apply and sync its changes");
        println!("  --import <file>  Upload a local file, into the repository root or --into <dir>");
        println!();
        println!("Without arguments the session keeps polling the tree and CI builds until Ctrl-C.");
        return Ok(());
    }

    init_tracing();
    let config = SessionConfig::from_env()?;
    let mut session = SessionRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Tree => {
            print!("{}", session.render_tree().await);
            Ok(())
        }
        CliMode::Ask(message) => {
            println!("{}", session.ask(&message).await?);
            Ok(())
        }
        CliMode::Repos => {
            for repo in session.repositories().await? {
                let visibility = if repo.private { "private" } else { "public" };
                println!("{} ({visibility})", repo.full_name);
            }
            Ok(())
        }
        CliMode::Import { file, into } => {
            println!("{}", session.import(&file, &into).await?);
            Ok(())
        }
        CliMode::Run | CliMode::Help => session.run().await,
    }
}
