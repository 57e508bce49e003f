//! Shell command parsing.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

pub const HELP: &str = "\
Commands:
  login <email>                 log in (prompts for the password)
  signup <name> <email>         create an account (prompts for the password)
  logout                        end the session and ask the server to drop its cookie
  refresh                       renew the access token now
  status                        show the current session
  get <endpoint>                authenticated GET
  delete <endpoint>             authenticated DELETE
  post <endpoint> <json>        authenticated POST
  put <endpoint> <json>         authenticated PUT
  guard <path>                  evaluate the route guard for a navigation
  help                          show this help
  quit                          exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { email: String },
    Signup { name: String, email: String },
    Logout,
    Refresh,
    Status,
    Get { endpoint: String },
    Delete { endpoint: String },
    Post { endpoint: String, body: Value },
    Put { endpoint: String, body: Value },
    Guard { path: String },
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "login" => Command::Login {
                email: single_arg(rest, "login <email>")?,
            },
            "signup" => {
                // The name may contain spaces; the email is the last word.
                let (name, email) = rest
                    .rsplit_once(char::is_whitespace)
                    .ok_or_else(|| anyhow!("Usage: signup <name> <email>"))?;
                Command::Signup {
                    name: name.trim().to_string(),
                    email: email.to_string(),
                }
            }
            "logout" => Command::Logout,
            "refresh" => Command::Refresh,
            "status" => Command::Status,
            "get" => Command::Get {
                endpoint: single_arg(rest, "get <endpoint>")?,
            },
            "delete" => Command::Delete {
                endpoint: single_arg(rest, "delete <endpoint>")?,
            },
            "post" => {
                let (endpoint, body) = endpoint_and_body(rest, "post <endpoint> <json>")?;
                Command::Post { endpoint, body }
            }
            "put" => {
                let (endpoint, body) = endpoint_and_body(rest, "put <endpoint> <json>")?;
                Command::Put { endpoint, body }
            }
            "guard" => Command::Guard {
                path: single_arg(rest, "guard <path>")?,
            },
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("Unknown command '{}'. Type 'help' for a list.", other),
        };
        Ok(Some(command))
    }
}

fn single_arg(rest: &str, usage: &str) -> Result<String> {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        bail!("Usage: {}", usage);
    }
    Ok(rest.to_string())
}

fn endpoint_and_body(rest: &str, usage: &str) -> Result<(String, Value)> {
    let (endpoint, body) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow!("Usage: {}", usage))?;
    let body = serde_json::from_str(body.trim()).context("Request body is not valid JSON")?;
    Ok((endpoint.to_string(), body))
}
