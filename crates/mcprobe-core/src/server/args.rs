use crate::error::ParseError;

use super::descriptor::{ServerDescriptor, ServerTransport};

const STDIO: &str = "--stdio";
const HTTP: &str = "--http";
const SSE: &str = "--sse";
const HEADER: &str = "--header";
const ENV: &str = "--env";

fn is_recognized(token: &str) -> bool {
    matches!(token, STDIO | HTTP | SSE | HEADER | ENV)
}

/// Parse a flag sequence into server descriptors, in input order.
///
/// ```text
/// --stdio <name> <command> [arg ...]
/// --http  <name> <url> [--header <key> <value>]...
/// --sse   <name> <url> [--header <key> <value>]...
/// --env   <KEY=VALUE>          (applies to the preceding --stdio server)
/// ```
///
/// A stdio argument vector runs until the next recognized flag, so
/// `--stdio fs npx -y pkg --http web http://x` is two servers and `-y`
/// belongs to `npx`.
pub fn parse_server_args<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<ServerDescriptor>, ParseError> {
    let tokens: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
    let mut servers: Vec<ServerDescriptor> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let flag = tokens[i];
        match flag {
            STDIO => {
                let name = take_name(&tokens, i, flag)?;
                let command = match tokens.get(i + 2) {
                    Some(c) if !is_recognized(c) => (*c).to_string(),
                    _ => return Err(ParseError::MissingCommand { name }),
                };
                i += 3;
                let start = i;
                while i < tokens.len() && !is_recognized(tokens[i]) {
                    i += 1;
                }
                servers.push(ServerDescriptor::stdio(
                    name,
                    command,
                    tokens[start..i].iter().copied(),
                ));
            }
            HTTP | SSE => {
                let name = take_name(&tokens, i, flag)?;
                let url = match tokens.get(i + 2) {
                    Some(u) if !u.starts_with('-') => (*u).to_string(),
                    _ => return Err(ParseError::MissingUrl { name }),
                };
                servers.push(ServerDescriptor::streamed(name, url));
                i += 3;
            }
            HEADER => {
                let (key, value) = match (tokens.get(i + 1), tokens.get(i + 2)) {
                    (Some(k), Some(v)) if !is_recognized(k) && !is_recognized(v) => (*k, *v),
                    _ => {
                        return Err(ParseError::MissingHeaderValue {
                            flag: flag.to_string(),
                        })
                    }
                };
                match servers.last_mut().map(|s| &mut s.transport) {
                    Some(ServerTransport::Streamed { headers, .. }) => {
                        headers.insert(key.to_string(), value.to_string());
                    }
                    _ => {
                        return Err(ParseError::HeaderOutsideStreamed {
                            flag: flag.to_string(),
                        })
                    }
                }
                i += 3;
            }
            ENV => {
                let token = tokens.get(i + 1).copied().unwrap_or_default();
                let (key, value) = token
                    .split_once('=')
                    .filter(|(k, _)| !k.is_empty())
                    .ok_or_else(|| ParseError::InvalidEnv {
                        token: token.to_string(),
                    })?;
                match servers.last_mut().map(|s| &mut s.transport) {
                    Some(ServerTransport::Stdio { env, .. }) => {
                        env.insert(key.to_string(), value.to_string());
                    }
                    _ => {
                        return Err(ParseError::EnvOutsideStdio {
                            flag: flag.to_string(),
                        })
                    }
                }
                i += 2;
            }
            other if other.starts_with('-') => {
                return Err(ParseError::UnknownFlag {
                    flag: other.to_string(),
                })
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    token: other.to_string(),
                })
            }
        }
    }

    Ok(servers)
}

fn take_name(tokens: &[&str], i: usize, flag: &str) -> Result<String, ParseError> {
    match tokens.get(i + 1) {
        Some(name) if !name.is_empty() && !name.starts_with('-') => Ok((*name).to_string()),
        _ => Err(ParseError::MissingName {
            flag: flag.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Vec<ServerDescriptor>, ParseError> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        parse_server_args(&tokens)
    }

    #[test]
    fn empty_input_yields_no_servers() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn stdio_args_run_until_next_recognized_flag() {
        let servers = parse(
            "--stdio fs npx -y @modelcontextprotocol/server-filesystem --root /tmp \
             --http web https://example.com/mcp",
        )
        .unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(
            servers[0],
            ServerDescriptor::stdio(
                "fs",
                "npx",
                ["-y", "@modelcontextprotocol/server-filesystem", "--root", "/tmp"]
            )
        );
        assert_eq!(
            servers[1],
            ServerDescriptor::streamed("web", "https://example.com/mcp")
        );
    }

    #[test]
    fn headers_and_env_attach_to_previous_server() {
        let servers = parse(
            "--sse web http://localhost:8080/mcp --header Authorization token \
             --header X-Team core --stdio py uvx mcp-server-time --env TZ=UTC",
        )
        .unwrap();
        assert_eq!(
            servers,
            vec![
                ServerDescriptor::streamed("web", "http://localhost:8080/mcp")
                    .with_header("Authorization", "token")
                    .with_header("X-Team", "core"),
                ServerDescriptor::stdio("py", "uvx", ["mcp-server-time"]).with_env("TZ", "UTC"),
            ]
        );
    }

    #[test]
    fn transport_flag_without_name_names_the_flag() {
        assert_eq!(
            parse("--stdio").unwrap_err(),
            ParseError::MissingName {
                flag: "--stdio".into()
            }
        );
        assert_eq!(
            parse("--stdio fs npx --http").unwrap_err(),
            ParseError::MissingName {
                flag: "--http".into()
            }
        );
    }

    #[test]
    fn stdio_without_command_fails() {
        assert_eq!(
            parse("--stdio fs --http web http://x").unwrap_err(),
            ParseError::MissingCommand { name: "fs".into() }
        );
        assert_eq!(
            parse("--stdio fs").unwrap_err(),
            ParseError::MissingCommand { name: "fs".into() }
        );
    }

    #[test]
    fn streamed_without_url_fails() {
        assert_eq!(
            parse("--http web").unwrap_err(),
            ParseError::MissingUrl { name: "web".into() }
        );
    }

    #[test]
    fn unknown_top_level_flag_fails() {
        assert_eq!(
            parse("--verbose --stdio fs npx").unwrap_err(),
            ParseError::UnknownFlag {
                flag: "--verbose".into()
            }
        );
        assert_eq!(
            parse("--http web http://x --retry 3").unwrap_err(),
            ParseError::UnknownFlag {
                flag: "--retry".into()
            }
        );
    }

    #[test]
    fn stray_positional_fails() {
        assert_eq!(
            parse("--http web http://x extra").unwrap_err(),
            ParseError::UnexpectedToken {
                token: "extra".into()
            }
        );
    }

    #[test]
    fn misplaced_header_and_env_fail() {
        assert!(matches!(
            parse("--stdio fs npx --header A B").unwrap_err(),
            ParseError::HeaderOutsideStreamed { .. }
        ));
        assert!(matches!(
            parse("--http web http://x --env A=1").unwrap_err(),
            ParseError::EnvOutsideStdio { .. }
        ));
        assert!(matches!(
            parse("--stdio fs npx --env NOVALUE").unwrap_err(),
            ParseError::InvalidEnv { .. }
        ));
        assert!(matches!(
            parse("--http web http://x --header Only").unwrap_err(),
            ParseError::MissingHeaderValue { .. }
        ));
    }

    #[test]
    fn reparsing_serialized_descriptor_is_identity() {
        let descriptors = vec![
            ServerDescriptor::stdio("fs", "npx", ["-y", "pkg@1.0.0", "/srv/data"])
                .with_env("DEBUG", "1")
                .with_env("TOKEN", "a=b"),
            ServerDescriptor::stdio("bare", "/usr/local/bin/server", Vec::<String>::new()),
            ServerDescriptor::streamed("web", "https://example.com/mcp")
                .with_header("Authorization", "Bearer abc"),
        ];
        for d in descriptors {
            assert_eq!(parse_server_args(&d.to_args()).unwrap(), vec![d]);
        }
    }
}
