//! Reverse lookups for domain validation.
//!
//! `nslookup` can hang indefinitely on a misconfigured resolver, so every lookup runs
//! under an explicit timeout and the child is killed when it expires.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Resolves an address or host name to a fully qualified host name
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Host name found for `address`, or `None` when the lookup failed
    async fn resolve(&self, address: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct NslookupResolver {
    program: String,
    timeout: Duration,
}

impl NslookupResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "nslookup".to_string(),
            timeout,
        }
    }

    /// Use a different lookup binary with nslookup-compatible output
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl HostResolver for NslookupResolver {
    async fn resolve(&self, address: &str) -> Option<String> {
        let child = Command::new(&self.program)
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(error) => {
                warn!(program = %self.program, error = %error, "Unable to run lookup");
                return None;
            }
        };

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                warn!(address = %address, error = %error, "Lookup process failed");
                return None;
            }
            Err(_) => {
                warn!(
                    address = %address,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Lookup timed out, process killed"
                );
                return None;
            }
        };

        let name = parse_nslookup_output(&String::from_utf8_lossy(&output.stdout));
        debug!(address = %address, resolved = ?name, "Reverse lookup finished");
        name
    }
}

/// Extract the resolved name from nslookup output.
///
/// Forward lookups print `Name:    host.example.org`; reverse lookups on some
/// platforms print `4.3.2.1.in-addr.arpa  name = host.example.org.`
pub fn parse_nslookup_output(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let name = if let Some(rest) = line.strip_prefix("Name:") {
            rest
        } else if line.contains("canonical name") {
            return None;
        } else if let Some(index) = line.find("name =") {
            &line[index + "name =".len()..]
        } else {
            return None;
        };

        let name = name.trim().trim_end_matches('.');
        (!name.is_empty()).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forward_output() {
        let output = "Server:\t\t10.0.0.2\nAddress:\t10.0.0.2#53\n\nName:\tsrv.clinic.org\nAddress: 10.0.0.7\n";
        assert_eq!(parse_nslookup_output(output).as_deref(), Some("srv.clinic.org"));
    }

    #[test]
    fn test_parse_reverse_output() {
        let output = "7.0.0.10.in-addr.arpa\tname = host.clinic.org.\n";
        assert_eq!(parse_nslookup_output(output).as_deref(), Some("host.clinic.org"));
    }

    #[test]
    fn test_parse_failure() {
        let output = "** server can't find 7.0.0.10.in-addr.arpa: NXDOMAIN\n";
        assert_eq!(parse_nslookup_output(output), None);
    }

    #[tokio::test]
    async fn test_missing_program_resolves_nothing() {
        let resolver = NslookupResolver::new(Duration::from_secs(1))
            .with_program("definitely-not-a-lookup-binary");
        assert_eq!(resolver.resolve("127.0.0.1").await, None);
    }
}
