use std::path::Path;

use anyhow::{Context, Result};

use conveyor_engine::package;

/// Execute the `inspect` command: print an archive's manifest and entries.
pub fn execute(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read archive: {}", path.display()))?;
    let manifest = package::read_manifest(&bytes)
        .with_context(|| format!("Not a function archive: {}", path.display()))?;
    let entries = package::list_entries(&bytes)?;

    println!("Function:   {}", manifest.name);
    match &manifest.entry_point.class_name {
        Some(class) => println!(
            "Entry:      {}:{}.{}",
            manifest.entry_point.file, class, manifest.entry_point.method
        ),
        None => println!(
            "Entry:      {}:{}",
            manifest.entry_point.file, manifest.entry_point.method
        ),
    }
    println!("Command:    {}", manifest.command.join(" "));
    println!("Files ({}):", entries.len());
    for entry in entries {
        println!("  {entry}");
    }
    Ok(())
}
