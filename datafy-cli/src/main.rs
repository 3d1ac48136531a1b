use clap::Parser;
use datafy_cli::cli::{self, Cli, Commands};
use datafy_cli::{config, logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log_format);

    let settings = config::init_settings(cli.config.as_deref(), &cli.overrides())?;
    let pipeline = settings.pipeline.clone();

    match cli.command {
        Commands::Analyze {
            file,
            prompt,
            temperature,
            rows,
            dry_run,
            output,
        } => {
            cli::analyze_command(file, prompt, temperature, rows, dry_run, output, pipeline).await?;
        }
        Commands::Chart {
            file,
            chart_config,
            output,
        } => {
            cli::chart_command(file, chart_config, output).await?;
        }
        Commands::Profile { file, rows, sample } => {
            cli::profile_command(file, rows, sample, pipeline).await?;
        }
        Commands::MockServer { port } => {
            cli::mock_server_command(port).await?;
        }
    }

    Ok(())
}
