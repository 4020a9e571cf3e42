//! Interactive operator prompts.

use anyhow::{Result, bail};
use std::io::{BufRead, Write, stdin, stdout};
use std::path::PathBuf;

use crate::core::version::InstallerPackage;

fn read_answer(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("No input available");
    }
    Ok(line.trim().to_string())
}

/// Ask for the installer location until something non-blank is entered.
pub fn prompt_installer_path() -> Result<PathBuf> {
    let mut input = stdin().lock();
    loop {
        print!("Full path of the Tomcat installer: ");
        stdout().flush()?;

        let answer = read_answer(&mut input)?;
        let answer = answer.trim_matches('"');
        if !answer.is_empty() {
            return Ok(PathBuf::from(answer));
        }
    }
}

pub fn prompt_confirm_install(package: &InstallerPackage) -> Result<bool> {
    println!("Tomcat will be stopped, reinstalled and restarted.\n");
    println!("  Installer: {}", package.path.display());
    println!("  Version:   {}", package.version);
    println!();
    print!("Continue? [y/N] ");
    stdout().flush()?;

    Ok(is_yes(&read_answer(&mut stdin().lock())?))
}

fn is_yes(answer: &str) -> bool {
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn answers_are_trimmed() {
        let mut input = Cursor::new("  Y \n");
        assert!(is_yes(&read_answer(&mut input).unwrap()));
    }

    #[test]
    fn closed_input_is_an_error() {
        let mut input = Cursor::new("");
        assert!(read_answer(&mut input).is_err());
    }

    #[test]
    fn anything_else_declines() {
        for answer in ["", "n", "no", "yep"] {
            assert!(!is_yes(answer));
        }
    }
}
