//! Primary user and passwords.
//!
//! Passwords go to `chpasswd` on stdin; they never reach argv, the logs or
//! the state file.

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::Result;
use crate::executor::{execute, Criticality};
use crate::prompt::{prompt_passphrase, PASSPHRASE_ATTEMPTS};
use crate::secret::Passphrase;
use crate::success;

/// `chpasswd` input line for `user`.
pub fn chpasswd_payload(user: &str, password: &Passphrase) -> String {
    format!("{}:{}\n", user, password.expose())
}

fn set_password(ctx: &mut DeployContext<'_>, user: &str) -> Result<()> {
    let password = prompt_passphrase(
        &mut *ctx.prompter,
        &format!("password for {}", user),
        PASSPHRASE_ATTEMPTS,
    )?;
    execute(
        ctx.exec,
        &CommandSpec::in_chroot(ctx.target_root(), "chpasswd").stdin(chpasswd_payload(user, &password)),
        &format!("Set password for {}", user),
        Criticality::Critical,
    )?;
    Ok(())
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let config = ctx.config()?.clone();

    execute(
        ctx.exec,
        &CommandSpec::in_chroot(ctx.target_root(), "useradd").args([
            "-m",
            "-G",
            "wheel",
            "-s",
            config.user_shell.as_str(),
            config.username.as_str(),
        ]),
        &format!("Create user {}", config.username),
        Criticality::Critical,
    )?;

    set_password(ctx, &config.username)?;
    set_password(ctx, "root")?;

    success!("User {} created (member of wheel)", config.username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chpasswd_payload() {
        let pw = Passphrase::new("s3cret pass");
        assert_eq!(chpasswd_payload("alice", &pw), "alice:s3cret pass\n");
    }

    #[test]
    fn test_password_stays_out_of_argv() {
        let pw = Passphrase::new("hunter2");
        let cmd = CommandSpec::in_chroot(std::path::Path::new("/mnt"), "chpasswd")
            .stdin(chpasswd_payload("root", &pw));
        let shown = cmd.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(!format!("{:?}", cmd).contains("hunter2"));
    }
}
