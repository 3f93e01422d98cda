pub mod config_values;
