use clap::Parser;
use content_fetcher::FetchStrategy;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wayfarer", version, about = "Rewriting forward proxy")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "wayfarer.yaml")]
    pub config: PathBuf,

    /// Listen address (overrides config file setting)
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory served for non-proxy paths (overrides config file setting)
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Document fetch strategy: direct, render or auto (overrides config file setting)
    #[arg(long)]
    pub strategy: Option<FetchStrategy>,

    /// Path to a substitution rules file (overrides config file setting)
    #[arg(short, long)]
    pub substitutions: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_parse() {
        let cli = Cli::parse_from([
            "wayfarer",
            "--listen",
            "0.0.0.0:9000",
            "--strategy",
            "auto",
            "-s",
            "rules.yaml",
        ]);
        assert_eq!(cli.config, PathBuf::from("wayfarer.yaml"));
        assert_eq!(cli.listen.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(cli.strategy, Some(FetchStrategy::Auto));
        assert_eq!(cli.substitutions, Some(PathBuf::from("rules.yaml")));
        assert!(cli.static_dir.is_none());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["wayfarer", "--strategy", "telepathy"]).is_err());
    }
}
