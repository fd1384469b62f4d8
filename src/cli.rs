use clap::Parser;

use crate::config::{PromptTheme, TunnelProvider};

#[derive(Parser, Debug, Default)]
#[command(version, about = "codetun installs code-server, exposes it through a public tunnel and streams its logs", long_about = None)]
pub(crate) struct CodetunCli {
    /// custom config file
    #[arg(short, long)]
    pub config: Option<String>,
    /// local port code-server binds to
    #[arg(short, long)]
    pub port: Option<u16>,
    /// code-server password, no authentication when unset
    #[arg(long, env = "CODETUN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// mount the configured drive before launching code-server
    #[arg(long)]
    pub mount_drive: bool,
    /// extra extension to install (repeatable)
    #[arg(short, long = "extension")]
    pub extensions: Vec<String>,
    /// shell prompt theme
    #[arg(long, value_enum)]
    pub prompt: Option<PromptTheme>,
    /// also install zsh
    #[arg(long)]
    pub zsh: bool,
    /// tunneling service
    #[arg(long, value_enum)]
    pub provider: Option<TunnelProvider>,
    /// where installer scripts are cached
    #[arg(long)]
    pub work_dir: Option<String>,
    #[arg(short, long)]
    pub verbose: bool,
}
