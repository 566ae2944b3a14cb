use anyhow::{Context, Result};
use minecraft_client_rs::Client;
use std::path::Path;
use tokio::fs;
use tokio::task::spawn_blocking;

const DEFAULT_RCON_PORT: u16 = 25575;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconSettings {
    pub address: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RconClient {
    address: String,
    password: String,
}

impl RconClient {
    pub fn new(address: String, password: String) -> Self {
        Self { address, password }
    }

    pub fn from_settings(settings: RconSettings) -> Self {
        Self::new(settings.address, settings.password)
    }

    /// Opens a connection, authenticates, runs one command and returns its body.
    pub async fn execute(&self, command: &str) -> Result<String> {
        let address = self.address.clone();
        let password = self.password.clone();
        let command = command.to_string();

        spawn_blocking(move || {
            let mut client = Client::new(address)
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            client
                .authenticate(password)
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            let response = client
                .send_command(command)
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            client
                .close()
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            Ok::<_, anyhow::Error>(response.body)
        })
        .await
        .with_context(|| "RCON task failed")?
    }

    pub async fn online_players(&self) -> Result<Vec<String>> {
        let body = self.execute("list").await?;
        Ok(parse_player_list(&body))
    }
}

/// Reads RCON settings from `server.properties` in `server_root`.
/// Returns `None` when the file is missing or RCON is disabled.
pub async fn load_rcon_settings(server_root: &Path) -> Result<Option<RconSettings>> {
    let properties_path = server_root.join("server.properties");
    let content = match fs::read_to_string(&properties_path).await {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    parse_rcon_settings(&content)
}

pub fn parse_rcon_settings(content: &str) -> Result<Option<RconSettings>> {
    let mut enabled = false;
    let mut port: Option<u16> = None;
    let mut password: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        match key.trim() {
            "enable-rcon" => enabled = value.trim().eq_ignore_ascii_case("true"),
            "rcon.port" => port = value.trim().parse::<u16>().ok(),
            "rcon.password" => {
                let val = value.trim();
                if !val.is_empty() {
                    password = Some(val.to_string());
                }
            }
            _ => {}
        }
    }

    if !enabled {
        return Ok(None);
    }

    let password = password.ok_or_else(|| anyhow::anyhow!("Missing rcon.password"))?;
    let address = format!("127.0.0.1:{}", port.unwrap_or(DEFAULT_RCON_PORT));
    Ok(Some(RconSettings { address, password }))
}

/// Parses the reply to `list`, e.g.
/// `There are 2 of a max of 20 players online: Steve, Alex` (1.13+) or
/// `There are 2/20 players online:\nSteve, Alex` (older servers).
pub fn parse_player_list(body: &str) -> Vec<String> {
    let body = strip_formatting(body);
    let Some((_, names)) = body.split_once(':') else {
        return Vec::new();
    };
    names
        .split([',', '\n'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drops `§x` colour/format codes some servers add to command output.
fn strip_formatting(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{RconSettings, parse_player_list, parse_rcon_settings};

    #[test]
    fn parses_modern_list_output() {
        assert_eq!(
            parse_player_list("There are 2 of a max of 20 players online: Steve, Alex"),
            ["Steve", "Alex"]
        );
    }

    #[test]
    fn parses_legacy_and_coloured_list_output() {
        assert_eq!(
            parse_player_list("There are §c1§r/§c20§r players online:\n§fNotch"),
            ["Notch"]
        );
    }

    #[test]
    fn empty_server_has_no_players() {
        assert!(parse_player_list("There are 0 of a max of 20 players online: ").is_empty());
        assert!(parse_player_list("Unknown command").is_empty());
    }

    #[test]
    fn reads_rcon_settings_from_properties() {
        let props = "# Minecraft server properties\nenable-rcon=true\nrcon.port=25600\nrcon.password=hunter2\n";
        assert_eq!(
            parse_rcon_settings(props).unwrap(),
            Some(RconSettings {
                address: "127.0.0.1:25600".to_string(),
                password: "hunter2".to_string(),
            })
        );
    }

    #[test]
    fn disabled_rcon_yields_none_and_missing_password_errors() {
        assert_eq!(parse_rcon_settings("enable-rcon=false\n").unwrap(), None);
        assert!(parse_rcon_settings("enable-rcon=true\nrcon.password=\n").is_err());
    }
}
