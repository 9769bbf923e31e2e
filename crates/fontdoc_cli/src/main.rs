//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `fontdoc_core` linkage.
//! - Given a font directory, print a layer summary and whether the files
//!   changed since they were read.

use fontdoc_core::{init_logging, DirStore, Font, FontStore, LoggingConfig};
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;

fn main() -> ExitCode {
    if let Some(config) = LoggingConfig::from_env() {
        if let Err(err) = init_logging(&config) {
            eprintln!("logging disabled: {err}");
        }
    }
    println!("fontdoc_core version={}", fontdoc_core::core_version());

    let Some(root) = std::env::args_os().nth(1) else {
        return ExitCode::SUCCESS;
    };
    match summarize(Path::new(&root)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn summarize(root: &Path) -> Result<(), Box<dyn Error>> {
    let store: Rc<dyn FontStore> = Rc::new(DirStore::open(root)?);
    let font = Font::open(store)?;
    println!(
        "location={} format={}",
        root.display(),
        font.format_version().unwrap_or_default()
    );

    let default_layer = font.layers().default_layer_name();
    for layer in font.layers().layers() {
        let name = layer.name();
        let marker = if default_layer.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("layer={name} glyphs={}{marker}", layer.len());
    }
    println!("images={} data={}", font.images().len(), font.data().len());

    let changes = font.test_for_external_changes()?;
    println!("external_changes={}", !changes.is_empty());
    Ok(())
}
