//! Command-line parsing

use anyhow::{Context, Result, bail};
use transport::{Method, RequestDescriptor};

pub const USAGE: &str = "\
usage: storefront-api [--config PATH] <command>

commands:
  sign-in ACCESS_TOKEN REFRESH_TOKEN   store a session
  sign-out                             forget the stored session
  status                               show the stored session
  refresh                              force a token refresh
  request [--lang L] [--query K=V]... METHOD PATH [JSON_BODY]
                                       send an authenticated request";

#[derive(Debug, PartialEq)]
pub struct Cli {
    pub config: Option<String>,
    pub command: Command,
}

#[derive(Debug, PartialEq)]
pub enum Command {
    SignIn { access_token: String, refresh_token: String },
    SignOut,
    Status,
    Refresh,
    Request(RequestArgs),
}

#[derive(Debug, PartialEq)]
pub struct RequestArgs {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub language: Option<String>,
    pub query: Vec<(String, String)>,
}

impl RequestArgs {
    pub fn descriptor(&self) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::new(self.method.clone(), self.path.as_str());
        if let Some(body) = &self.body {
            descriptor = descriptor.json(body.clone());
        }
        if let Some(language) = &self.language {
            descriptor = descriptor.language(language.as_str());
        }
        for (key, value) in &self.query {
            descriptor = descriptor.query(key.as_str(), value.as_str());
        }
        descriptor
    }
}

/// Parse arguments, excluding the program name.
pub fn parse<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut language = None;
    let mut query = Vec::new();
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(args.next().context("--config needs a path")?),
            "--lang" => language = Some(args.next().context("--lang needs a value")?),
            "--query" => {
                let pair = args.next().context("--query needs KEY=VALUE")?;
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("--query expects KEY=VALUE, got {pair}"))?;
                query.push((key.to_string(), value.to_string()));
            }
            "-h" | "--help" => bail!("{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("sign-in") => {
            let (Some(access_token), Some(refresh_token)) = (positional.next(), positional.next())
            else {
                bail!("sign-in needs ACCESS_TOKEN and REFRESH_TOKEN\n\n{USAGE}");
            };
            Command::SignIn {
                access_token,
                refresh_token,
            }
        }
        Some("sign-out") => Command::SignOut,
        Some("status") => Command::Status,
        Some("refresh") => Command::Refresh,
        Some("request") => {
            let (Some(method), Some(path)) = (positional.next(), positional.next()) else {
                bail!("request needs METHOD and PATH\n\n{USAGE}");
            };
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method {method}"))?;
            let body = positional
                .next()
                .map(|raw| serde_json::from_str(&raw).context("request body is not valid JSON"))
                .transpose()?;
            Command::Request(RequestArgs {
                method,
                path,
                body,
                language,
                query,
            })
        }
        Some(other) => bail!("unknown command {other}\n\n{USAGE}"),
        None => bail!("{USAGE}"),
    };

    if let Some(extra) = positional.next() {
        bail!("unexpected argument {extra}");
    }

    Ok(Cli { config, command })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_sign_in_with_config() {
        let cli = parse(args(&["--config", "/etc/sf.toml", "sign-in", "at", "rt"])).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/sf.toml"));
        assert_eq!(
            cli.command,
            Command::SignIn {
                access_token: "at".into(),
                refresh_token: "rt".into()
            }
        );
    }

    #[test]
    fn test_parse_request_with_options() {
        let cli = parse(args(&[
            "request",
            "post",
            "/cart/items",
            r#"{"courseId": 7}"#,
            "--lang",
            "de",
            "--query",
            "page=2",
        ]))
        .unwrap();

        let Command::Request(request) = cli.command else {
            panic!("expected request command");
        };
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body, Some(json!({"courseId": 7})));

        let descriptor = request.descriptor();
        assert_eq!(descriptor.path(), "/cart/items");
        assert_eq!(descriptor.language_override(), Some("de"));
        assert_eq!(
            descriptor.query_pairs(),
            &[("page".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(args(&[])).is_err());
        assert!(parse(args(&["launch"])).is_err());
        assert!(parse(args(&["sign-in", "only-access"])).is_err());
        assert!(parse(args(&["request", "GET"])).is_err());
        assert!(parse(args(&["request", "GET", "/x", "{not json"])).is_err());
        assert!(parse(args(&["request", "GET", "/x", "--query", "novalue"])).is_err());
        assert!(parse(args(&["status", "extra"])).is_err());
        assert!(parse(args(&["--config"])).is_err());
    }
}
