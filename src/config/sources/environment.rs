//! Environment source: GENJOB__SECTION__KEY overrides, e.g. GENJOB__TIMING__MAX_WAIT_MS.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("GENJOB")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("ladder.models")
            .with_list_parse_key("ladder.credentials"),
    )
}
