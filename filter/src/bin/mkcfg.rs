//! Generate volume configuration bytes for the aes256 filter.
//!
//! Usage: `mkcfg [OPTIONS]` where OPTIONS is the filter option string, e.g.
//! `paranoid` or `nogenkey,salt:000102030405060708090a0b0c0d0e0f`. With no
//! options the volume password is read from stdin (twice) and the resulting
//! fingerprint is embedded. The configuration is printed as hex.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use secrecy::SecretString;
use valvfilter::options::VolumeOptions;
use valvfilter_host::SecretInput;

struct StdinInput;

impl SecretInput for StdinInput {
    fn prompt_sensitive(&mut self, prompt: &str) -> Result<SecretString> {
        eprint!("{prompt}");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(SecretString::new(line))
    }
}

fn main() -> Result<()> {
    let options = std::env::args().nth(1).unwrap_or_default();
    let options = VolumeOptions::parse(&options)?;
    let config = options.create_config(&mut StdinInput)?;
    println!("{}", hex::encode(&config.cfgdata));
    Ok(())
}
