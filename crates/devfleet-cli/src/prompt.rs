use std::io::{self, Write};

use anyhow::{Context, Result};

pub fn present_choices(items: &[String]) {
    for (index, item) in items.iter().enumerate() {
        println!("  {}) {}", index + 1, item);
    }
}

pub fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("failed to read input")?;
    Ok(input.trim().to_string())
}

/// Explicit yes only; anything else declines.
pub fn confirm(prompt: &str) -> Result<bool> {
    let answer = read_line(prompt)?.to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
