//! External mixer launcher
//!
//! Spawns the configured mixer program detached from the engine. A waiter
//! thread reaps the child so it neither blocks the engine nor lingers as
//! a zombie.

use std::io;
use std::process::{Command, Stdio};
use std::thread;

/// Spawn the mixer command line (whitespace-split program + args)
pub fn launch(command: &str) -> io::Result<()> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty mixer command")
    })?;

    let mut child = Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    log::info!("launcher: started mixer '{}' (pid {})", command, child.id());
    thread::Builder::new()
        .name("panvol-mixer-wait".to_string())
        .spawn(move || {
            let _ = child.wait();
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(launch("").is_err());
        assert!(launch("   ").is_err());
    }

    #[test]
    fn test_missing_executable_is_reported() {
        let err = launch("/nonexistent/mixer-binary --with-args").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_spawns_detached() {
        // `true` exits immediately; the waiter thread reaps it.
        launch("true").unwrap();
    }
}
