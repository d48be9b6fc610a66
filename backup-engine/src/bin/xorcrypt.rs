//! Reference encryptor: repeating-key XOR, applied in place.
//!
//! Usage: `xorcrypt <file> <key>`. Prints the elapsed milliseconds and exits
//! 0 on success; exits -99 on any error. Applying it twice restores the file.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const BUFFER_SIZE: usize = 4096;
const FAILURE_CODE: i32 = -99;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let started = Instant::now();

    match run(&args) {
        Ok(()) => {
            println!("{}", started.elapsed().as_millis());
        }
        Err(e) => {
            eprintln!("xorcrypt: {:#}", e);
            std::process::exit(FAILURE_CODE);
        }
    }
}

fn run(args: &[String]) -> Result<()> {
    let [file, key] = args else {
        bail!("usage: xorcrypt <file> <key>");
    };
    if key.is_empty() {
        bail!("key must not be empty");
    }

    let path = Path::new(file);
    let temp = sibling_temp(path);
    if let Err(e) = xor_into(path, &temp, key.as_bytes()) {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }
    std::fs::rename(&temp, path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn sibling_temp(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".xor");
    PathBuf::from(name)
}

fn xor_into(source: &Path, dest: &Path, key: &[u8]) -> Result<()> {
    let mut reader = BufReader::new(
        File::open(source).with_context(|| format!("opening {}", source.display()))?,
    );
    let mut writer = BufWriter::new(
        File::create(dest).with_context(|| format!("creating {}", dest.display()))?,
    );

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut offset = 0usize;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        for byte in &mut buffer[..n] {
            *byte ^= key[offset % key.len()];
            offset += 1;
        }
        writer.write_all(&buffer[..n])?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_xor_twice_restores() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.txt");
        let original: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &original)?;

        let args = vec![path.display().to_string(), "k1".to_string()];
        run(&args)?;
        assert_ne!(std::fs::read(&path)?, original);
        run(&args)?;
        assert_eq!(std::fs::read(&path)?, original);
        assert!(!sibling_temp(&path).exists());
        Ok(())
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(run(&[]).is_err());
        assert!(run(&["file".to_string(), String::new()]).is_err());
        assert!(run(&["/definitely/missing".to_string(), "k".to_string()]).is_err());
    }
}
