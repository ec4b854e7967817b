//! Types for use when configuring hrss modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> HrssResult<D> {
    let v = serde_json::to_value(s)
        .map_err(|e| HrssError::other_src("encode module config", e))?;
    serde_json::from_value(v).map_err(|e| {
        HrssError::configuration(format!("decode module config: {e}"))
    })
}

/// Denotes a type used to configure a specific hrss module.
///
/// These are startup-time settings, the likes of which might be found
/// in a configuration file. Runtime knobs belong on the module itself.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Module configuration, keyed by module name.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// When generating a default or example configuration file, the
    /// builder passes a mutable reference of this config struct to each
    /// configured module factory. Those factories call this function
    /// to add their default configuration parameters.
    pub fn add_default_module_config<M: ModConfig>(
        &mut self,
        module_name: String,
    ) -> HrssResult<()> {
        if self.0.contains_key(&module_name) {
            return Err(HrssError::other(format!(
                "Refusing to overwrite conflicting module name: {module_name}"
            )));
        }
        self.0.insert(module_name, tc(&M::default())?);
        Ok(())
    }

    /// Extract a module config. Note that this config may be loaded from
    /// disk and edited by humans, so the serialization on the module
    /// config should be tolerant to missing properties, setting sane defaults.
    pub fn get_module_config<M: ModConfig>(
        &self,
        module_name: &str,
    ) -> HrssResult<M> {
        self.0
            .get(module_name)
            .map(tc)
            .unwrap_or_else(|| Ok(M::default()))
    }

    /// Replace a module config wholesale, for instance to shorten
    /// timeouts in tests.
    pub fn set_module_config<M: ModConfig>(
        &mut self,
        module_name: String,
        module_config: &M,
    ) -> HrssResult<()> {
        self.0.insert(module_name, tc(module_config)?);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    struct Store {
        #[serde(rename = "#syncData", skip_deserializing)]
        doc_sync_data: &'static str,
        sync_data: bool,
        dir_name: String,
    }

    impl Default for Store {
        fn default() -> Self {
            Self {
                doc_sync_data: "Flush every append to disk.",
                sync_data: true,
                dir_name: "logs".into(),
            }
        }
    }

    impl ModConfig for Store {}

    #[derive(
        Debug, Default, serde::Serialize, serde::Deserialize, PartialEq,
    )]
    #[serde(rename_all = "camelCase")]
    struct Timeouts {
        #[serde(default)]
        connect_ms: u32,
    }

    impl ModConfig for Timeouts {}

    #[test]
    fn default_config_output() {
        let mut config = Config::default();
        config
            .add_default_module_config::<Store>("store".into())
            .unwrap();
        config
            .add_default_module_config::<Timeouts>("timeouts".into())
            .unwrap();

        assert_eq!(
            r##"{
  "store": {
    "#syncData": "Flush every append to disk.",
    "syncData": true,
    "dirName": "logs"
  },
  "timeouts": {
    "connectMs": 0
  }
}"##,
            serde_json::to_string_pretty(&config).unwrap()
        );
    }

    #[test]
    fn tolerant_load() {
        let config: Config = serde_json::from_str(
            r#"{
          "unknown": { "foo": "bar" },
          "store": { "syncData": false, "extra": 1 }
        }"#,
        )
        .unwrap();

        assert_eq!(
            Store {
                sync_data: false,
                ..Default::default()
            },
            config.get_module_config::<Store>("store").unwrap(),
        );

        // unset mods get the default
        assert_eq!(
            Timeouts::default(),
            config.get_module_config::<Timeouts>("timeouts").unwrap(),
        );
    }

    #[test]
    fn set_overrides_default() {
        let mut config = Config::default();
        config
            .add_default_module_config::<Timeouts>("t".into())
            .unwrap();
        assert!(config
            .add_default_module_config::<Timeouts>("t".into())
            .is_err());
        config
            .set_module_config("t".into(), &Timeouts { connect_ms: 5 })
            .unwrap();
        assert_eq!(
            Timeouts { connect_ms: 5 },
            config.get_module_config::<Timeouts>("t").unwrap(),
        );
    }
}
