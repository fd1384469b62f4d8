use std::{env::VarError, path::PathBuf};

use serde::{
    Deserialize,
    de::{self, Visitor},
};
use thiserror::Error;

use crate::cli::CodetunCli;

pub const DEFAULT_PATH: &str = "~/.config/codetun.toml";
pub const DEFAULT_PORT: u16 = 10000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error while reading config {0}: {1}")]
    Read(String, String),
    #[error("invalid config: {1}")]
    Parse(toml::de::Error, String),
    #[error("{0} not found in the environment!")]
    EnvMissing(String),
    #[error("{0} is not unicode!")]
    EnvNotUnicode(String),
    #[error("invalid extension identifier {0:?}, pass a list of strings e.g. [\"ms-python.python\"]")]
    InvalidExtension(String),
    #[error("invalid [drive] section: {0}")]
    InvalidDrive(String),
}
impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        let str_value = value.to_string();
        Self::Parse(value, str_value)
    }
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(default)]
pub(crate) struct CodetunConfig {
    pub port: u16,
    pub password: Option<EnvOrValue>,
    pub mount_drive: bool,
    /// appended to the default extension list
    pub extensions: Option<Vec<String>>,
    pub prompt: PromptTheme,
    pub zsh: bool,
    pub work_dir: String,
    pub packages: Vec<String>,
    pub tunnel: TunnelSettings,
    pub drive: Option<DriveConfig>,
}
impl Default for CodetunConfig {
    fn default() -> Self {
        CodetunConfig {
            port: DEFAULT_PORT,
            password: None,
            mount_drive: false,
            extensions: None,
            prompt: PromptTheme::default(),
            zsh: false,
            work_dir: String::from("."),
            packages: vec![String::from("python3-venv"), String::from("nano")],
            tunnel: TunnelSettings::default(),
            drive: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PromptTheme {
    #[default]
    PowerlinePlain,
    Powerline,
    Agnoster,
    PowerlineUndu,
}
impl PromptTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptTheme::PowerlinePlain => "powerline-plain",
            PromptTheme::Powerline => "powerline",
            PromptTheme::Agnoster => "agnoster",
            PromptTheme::PowerlineUndu => "powerline-undu",
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub(crate) struct TunnelSettings {
    pub provider: TunnelProvider,
    pub ngrok: NgrokConfig,
    pub ssh: SshRelayConfig,
}
#[derive(Deserialize, Debug, PartialEq, Clone, Copy, Default, clap::ValueEnum)]
pub enum TunnelProvider {
    #[default]
    #[serde(alias = "ngrok", alias = "NGROK")]
    Ngrok,
    #[serde(alias = "ssh", alias = "SSH")]
    Ssh,
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct NgrokConfig {
    pub binary: String,
    pub auth_token: Option<EnvOrValue>,
    pub region: Option<String>,
    /// an agent already answering here is reused instead of spawning a new one
    pub api_addr: String,
}
impl Default for NgrokConfig {
    fn default() -> Self {
        NgrokConfig {
            binary: String::from("ngrok"),
            auth_token: None,
            region: None,
            api_addr: String::from("127.0.0.1:4040"),
        }
    }
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct SshRelayConfig {
    pub remote_ssh_address: String,
    pub remote_ssh_port: u16,
    pub remote_ssh_user: String,
    /// the relay is accessed with the `none` auth method when unset
    pub private_key_path: Option<String>,
    pub private_key_passphrase: Option<EnvOrValue>,
    pub remote_interface_address: String,
    pub remote_interface_port: u16,
    pub known_hosts_db: String,
}
impl Default for SshRelayConfig {
    fn default() -> Self {
        SshRelayConfig {
            remote_ssh_address: String::from("localhost.run"),
            remote_ssh_port: 22,
            remote_ssh_user: String::from("nokey"),
            private_key_path: None,
            private_key_passphrase: None,
            remote_interface_address: String::from("localhost"),
            remote_interface_port: 80,
            known_hosts_db: String::from("~/.local/share/codetun/known_hosts.db"),
        }
    }
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct DriveConfig {
    pub mount_point: String,
    pub command: Vec<String>,
}

#[derive(Clone, PartialEq, Debug)]
pub(crate) struct EnvOrValue {
    from_env: Option<String>,
    value: Option<String>,
}
impl EnvOrValue {
    pub fn value(value: impl Into<String>) -> Self {
        EnvOrValue {
            from_env: None,
            value: Some(value.into()),
        }
    }
    pub fn resolve(&self) -> Result<String, ConfigError> {
        match (&self.value, &self.from_env) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(env_var)) => std::env::var(env_var).map_err(|e| match e {
                VarError::NotPresent => ConfigError::EnvMissing(env_var.clone()),
                VarError::NotUnicode(_) => ConfigError::EnvNotUnicode(env_var.clone()),
            }),
            // the deserializer never builds this one
            (None, None) => Err(ConfigError::EnvMissing(String::new())),
        }
    }
}

/// Settings the bootstrapper runs with, secrets already resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BootstrapConfig {
    pub port: u16,
    pub password: Option<String>,
    pub mount_drive: bool,
    pub extra_extensions: Option<Vec<String>>,
    pub prompt: PromptTheme,
    pub zsh: bool,
    pub work_dir: PathBuf,
    pub packages: Vec<String>,
}
impl Default for BootstrapConfig {
    fn default() -> Self {
        let defaults = CodetunConfig::default();
        BootstrapConfig {
            port: defaults.port,
            password: None,
            mount_drive: defaults.mount_drive,
            extra_extensions: None,
            prompt: defaults.prompt,
            zsh: defaults.zsh,
            work_dir: PathBuf::from(defaults.work_dir),
            packages: defaults.packages,
        }
    }
}

/// Reads the config file. A missing default file means defaults, a missing
/// explicit one is an error.
pub(crate) fn load(path: Option<&str>) -> Result<CodetunConfig, ConfigError> {
    let explicit = path.is_some();
    let path = expand_path(path.unwrap_or(DEFAULT_PATH));
    match std::fs::read_to_string(&path) {
        Ok(raw) => parse(&raw),
        Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(CodetunConfig::default())
        }
        Err(e) => Err(ConfigError::Read(path.display().to_string(), e.to_string())),
    }
}

pub(crate) fn parse(raw: &str) -> Result<CodetunConfig, ConfigError> {
    Ok(toml::from_str(raw)?)
}

pub(crate) fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl CodetunConfig {
    /// Command line flags win over the file.
    pub fn with_overrides(mut self, cli: &CodetunCli) -> Self {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(password) = &cli.password {
            self.password = Some(EnvOrValue::value(password));
        }
        self.mount_drive |= cli.mount_drive;
        if !cli.extensions.is_empty() {
            self.extensions
                .get_or_insert_with(Vec::new)
                .extend(cli.extensions.iter().cloned());
        }
        if let Some(prompt) = cli.prompt {
            self.prompt = prompt;
        }
        self.zsh |= cli.zsh;
        if let Some(provider) = cli.provider {
            self.tunnel.provider = provider;
        }
        if let Some(work_dir) = &cli.work_dir {
            self.work_dir = work_dir.clone();
        }
        self
    }

    /// An empty password means no password.
    pub fn bootstrap_config(&self) -> Result<BootstrapConfig, ConfigError> {
        let password = self
            .password
            .as_ref()
            .map(EnvOrValue::resolve)
            .transpose()?
            .filter(|password| !password.is_empty());
        Ok(BootstrapConfig {
            port: self.port,
            password,
            mount_drive: self.mount_drive,
            extra_extensions: self.extensions.clone(),
            prompt: self.prompt,
            zsh: self.zsh,
            work_dir: expand_path(&self.work_dir),
            packages: self.packages.clone(),
        })
    }
}

impl<'de> Deserialize<'de> for EnvOrValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EnvOrValueVisitor;
        impl<'de> Visitor<'de> for EnvOrValueVisitor {
            type Value = EnvOrValue;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter
                    .write_str("a map with at least one between `from_env` or `value` set to Some")
            }
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut from_env = None;
                let mut value = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "from_env" => from_env = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        _ => return Err(de::Error::unknown_field(&key, &["from_env", "value"])),
                    }
                }

                if from_env.is_none() && value.is_none() {
                    return Err(de::Error::custom(
                        "at least one between `from_env` or `value` must be provided!",
                    ));
                }
                if from_env.is_some() && value.is_some() {
                    from_env = None; // value takes precedence
                }
                Ok(EnvOrValue { value, from_env })
            }
        }
        deserializer.deserialize_map(EnvOrValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let parsed = parse("").unwrap();
        assert_eq!(parsed, CodetunConfig::default());
        assert_eq!(parsed.port, 10000);
        assert_eq!(parsed.prompt, PromptTheme::PowerlinePlain);
        assert_eq!(parsed.tunnel.provider, TunnelProvider::Ngrok);
        assert_eq!(parsed.packages, vec!["python3-venv", "nano"]);
    }

    #[test]
    fn full_config_deserialization() {
        let config_str = r#"
            port = 8443
            password.value = "hunter2"
            mount_drive = true
            extensions = ["ms-toolsai.jupyter", "ms-python.python"]
            prompt = "agnoster"
            zsh = true
            work_dir = "/tmp/codetun"
            packages = ["htop"]
            [tunnel]
            provider = "ssh"
            [tunnel.ssh]
            remote_ssh_address = "serveo.net"
            remote_ssh_user = "macca"
            private_key_path = "~/.ssh/id_ed25519"
            private_key_passphrase.from_env = "KEY_PASS"
            [drive]
            mount_point = "/content/drive"
            command = ["google-drive-ocamlfuse", "/content/drive"]
        "#;
        let parsed = parse(config_str).unwrap();
        assert_eq!(parsed.port, 8443);
        assert_eq!(parsed.password, Some(EnvOrValue::value("hunter2")));
        assert!(parsed.mount_drive);
        assert_eq!(
            parsed.extensions,
            Some(vec![
                String::from("ms-toolsai.jupyter"),
                String::from("ms-python.python")
            ])
        );
        assert_eq!(parsed.prompt, PromptTheme::Agnoster);
        assert!(parsed.zsh);
        assert_eq!(parsed.packages, vec!["htop"]);
        assert_eq!(parsed.tunnel.provider, TunnelProvider::Ssh);
        assert_eq!(
            parsed.tunnel.ssh,
            SshRelayConfig {
                remote_ssh_address: String::from("serveo.net"),
                remote_ssh_user: String::from("macca"),
                private_key_path: Some(String::from("~/.ssh/id_ed25519")),
                private_key_passphrase: Some(EnvOrValue {
                    from_env: Some(String::from("KEY_PASS")),
                    value: None,
                }),
                ..SshRelayConfig::default()
            }
        );
        assert_eq!(
            parsed.drive,
            Some(DriveConfig {
                mount_point: String::from("/content/drive"),
                command: vec![
                    String::from("google-drive-ocamlfuse"),
                    String::from("/content/drive")
                ],
            })
        );
    }

    #[test]
    fn provider_aliases() {
        for (raw, expected) in [
            ("ngrok", TunnelProvider::Ngrok),
            ("NGROK", TunnelProvider::Ngrok),
            ("Ngrok", TunnelProvider::Ngrok),
            ("ssh", TunnelProvider::Ssh),
            ("SSH", TunnelProvider::Ssh),
        ] {
            let parsed = parse(&format!("[tunnel]\nprovider = \"{raw}\"")).unwrap();
            assert_eq!(parsed.tunnel.provider, expected);
        }
    }

    #[test]
    fn extensions_must_be_a_list_of_strings() {
        assert!(matches!(
            parse(r#"extensions = "ms-python.python""#),
            Err(ConfigError::Parse(..))
        ));
        assert!(matches!(
            parse("extensions = [1, 2]"),
            Err(ConfigError::Parse(..))
        ));
    }

    #[test]
    fn unknown_prompt_theme_is_rejected() {
        assert!(matches!(
            parse(r#"prompt = "bobby""#),
            Err(ConfigError::Parse(..))
        ));
    }

    #[test]
    fn env_or_value_needs_one_key() {
        assert!(parse("[password]").is_err());
        assert!(parse("password.nope = \"x\"").is_err());
        let both = parse(
            r#"
            password.value = "inline"
            password.from_env = "IGNORED"
        "#,
        )
        .unwrap();
        assert_eq!(both.password, Some(EnvOrValue::value("inline")));
    }

    #[test]
    fn password_from_env_is_resolved() {
        // SAFETY: the variable name is unique to this test
        unsafe { std::env::set_var("CODETUN_TEST_PASSWORD", "from-env") };
        let parsed = parse(r#"password.from_env = "CODETUN_TEST_PASSWORD""#).unwrap();
        let resolved = parsed.bootstrap_config().unwrap();
        assert_eq!(resolved.password.as_deref(), Some("from-env"));

        let missing = parse(r#"password.from_env = "CODETUN_TEST_NOT_THERE""#).unwrap();
        assert!(matches!(
            missing.bootstrap_config(),
            Err(ConfigError::EnvMissing(var)) if var == "CODETUN_TEST_NOT_THERE"
        ));
    }

    #[test]
    fn cli_overrides_file() {
        let file = parse(
            r#"
            port = 9000
            extensions = ["from.file"]
        "#,
        )
        .unwrap();
        let cli = CodetunCli {
            port: Some(9100),
            password: Some(String::from("secret")),
            extensions: vec![String::from("from.cli")],
            prompt: Some(PromptTheme::PowerlineUndu),
            provider: Some(TunnelProvider::Ssh),
            zsh: true,
            ..CodetunCli::default()
        };
        let merged = file.with_overrides(&cli);
        assert_eq!(merged.tunnel.provider, TunnelProvider::Ssh);
        let resolved = merged.bootstrap_config().unwrap();
        assert_eq!(resolved.port, 9100);
        assert_eq!(resolved.password.as_deref(), Some("secret"));
        assert_eq!(
            resolved.extra_extensions,
            Some(vec![String::from("from.file"), String::from("from.cli")])
        );
        assert_eq!(resolved.prompt, PromptTheme::PowerlineUndu);
        assert!(resolved.zsh);
        assert!(!resolved.mount_drive);
    }

    #[test]
    fn empty_password_means_no_password() {
        let cli = CodetunCli {
            password: Some(String::new()),
            ..CodetunCli::default()
        };
        let resolved = parse("")
            .unwrap()
            .with_overrides(&cli)
            .bootstrap_config()
            .unwrap();
        assert_eq!(resolved.password, None);

        let inline = parse(r#"password.value = """#).unwrap();
        assert_eq!(inline.bootstrap_config().unwrap().password, None);

        // SAFETY: the variable name is unique to this test
        unsafe { std::env::set_var("CODETUN_TEST_EMPTY_PASSWORD", "") };
        let from_env = parse(r#"password.from_env = "CODETUN_TEST_EMPTY_PASSWORD""#).unwrap();
        assert_eq!(from_env.bootstrap_config().unwrap().password, None);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(matches!(
            load(Some(path.to_str().unwrap())),
            Err(ConfigError::Read(..))
        ));
    }

    #[test]
    fn theme_names_round_trip_through_clap() {
        use clap::ValueEnum;
        for theme in PromptTheme::value_variants() {
            let name = theme.to_possible_value().unwrap();
            assert_eq!(name.get_name(), theme.as_str());
        }
    }
}
