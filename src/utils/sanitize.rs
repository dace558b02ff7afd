// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Result};
use tracing::warn;

/// Upper bound on a remote command line. ssh passes it as a single argument
/// and remote shells start rejecting much beyond this.
const MAX_COMMAND_LENGTH: usize = 128 * 1024;

/// Validate a remote command before it is sent to every host.
pub fn sanitize_command(command: &str) -> Result<String> {
    if command.trim().is_empty() {
        bail!("Empty command not allowed");
    }

    if command.len() > MAX_COMMAND_LENGTH {
        bail!(
            "Command too long: {} bytes (max: {} bytes)",
            command.len(),
            MAX_COMMAND_LENGTH
        );
    }

    if command.contains('\0') {
        bail!("Command contains null bytes");
    }

    // Fan-out multiplies the damage of these, so call them out.
    let risky_patterns = [
        (":(){ :|:& };:", "fork bomb"),
        ("rm -rf / ", "recursive delete of /"),
        ("mkfs", "filesystem creation"),
    ];
    for (pattern, description) in &risky_patterns {
        if command.contains(pattern) {
            warn!("Command contains '{pattern}' ({description}); it will run on every host");
        }
    }

    Ok(command.to_string())
}

/// Validate a login name given on the command line or in a config file.
pub fn sanitize_username(username: &str) -> Result<String> {
    if username.trim().is_empty() {
        bail!("Empty username not allowed");
    }

    const MAX_USERNAME_LENGTH: usize = 32;
    if username.len() > MAX_USERNAME_LENGTH {
        bail!(
            "Username too long: {} bytes (max: {} bytes)",
            username.len(),
            MAX_USERNAME_LENGTH
        );
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.';
    if !username.chars().all(valid_chars) {
        bail!("Invalid characters in username: {}", username);
    }

    if let Some(first_char) = username.chars().next() {
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            bail!("Username must start with letter or underscore");
        }
    }

    Ok(username.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_command_valid() {
        assert!(sanitize_command("ls -la").is_ok());
        assert!(sanitize_command("echo $(hostname) | tr a-z A-Z").is_ok());
    }

    #[test]
    fn test_sanitize_command_rejects() {
        assert!(sanitize_command("").is_err());
        assert!(sanitize_command("  \t").is_err());
        assert!(sanitize_command("echo\0hi").is_err());
        assert!(sanitize_command(&"x".repeat(MAX_COMMAND_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_sanitize_username() {
        assert!(sanitize_username("deploy").is_ok());
        assert!(sanitize_username("_svc.ops-1").is_ok());
        assert!(sanitize_username("1user").is_err());
        assert!(sanitize_username("user;id").is_err());
        assert!(sanitize_username("").is_err());
    }
}
