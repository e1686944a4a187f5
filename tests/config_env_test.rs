//! Environment overrides. Kept in its own test binary so the variables it
//! sets cannot leak into other config tests.

use apt_motion::config::AptConfig;

#[test]
fn test_environment_overrides_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "apt.toml",
            r#"
            [application]
            log_level = "info"

            [discovery]
            port_marker = "APT"
            "#,
        )?;
        jail.set_env("APT_MOTION_APPLICATION__LOG_LEVEL", "warn");
        jail.set_env("APT_MOTION_DISCOVERY__PORT_MARKER", "Thorlabs");

        let config = AptConfig::load_from("apt.toml")?;
        assert_eq!(config.application.log_level, "warn");
        assert_eq!(config.discovery.port_marker, "Thorlabs");
        Ok(())
    });
}
