use std::path::Path;

use loadgrid_core::LoadgridConfig;

pub fn init(output: &Path, target_rps: f64, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let config = LoadgridConfig::scaffold(target_rps);
    std::fs::write(output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_parseable_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loadgrid.toml");
        init(&path, 75.0, false).unwrap();

        let config = LoadgridConfig::from_file(&path).unwrap();
        let target = config.to_target().unwrap();
        assert_eq!(target.target_rps, 75.0);
        assert!(target.validate().is_ok());
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loadgrid.toml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(init(&path, 40.0, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");

        init(&path, 40.0, true).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[target]"));
    }
}
