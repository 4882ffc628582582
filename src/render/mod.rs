//! The renderer (C2): pure functions turning store rows into BIND9 text
//! configuration. Nothing in this module touches the filesystem or a
//! process; [`crate::bind`] is the only thing that writes these strings out
//! and manages BIND.

pub mod conf;
pub mod rpz;
pub mod zonefile;

pub use conf::{
    render_forwarders_conf, render_named_conf_includes, render_rpz_policy_conf, render_zones_conf,
    validate_named_conf,
};
pub use rpz::render_rpz_zonefiles;
pub use zonefile::render_zonefile;
