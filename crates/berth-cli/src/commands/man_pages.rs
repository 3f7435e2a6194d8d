use super::EXIT_SUCCESS;
use clap::{Command, CommandFactory};
use std::path::Path;

fn render_page(cmd: Command, path: &Path) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    std::fs::write(path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

/// Write `berth.1` plus one `berth-<subcommand>.1` page per subcommand.
pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let cmd = C::command();
    let root = cmd.get_name().to_owned();
    render_page(cmd.clone(), &dir.join(format!("{root}.1")))?;
    for sub in cmd.get_subcommands() {
        let page = format!("{root}-{}", sub.get_name());
        render_page(sub.clone(), &dir.join(format!("{page}.1")))?;
    }
    println!("man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}
