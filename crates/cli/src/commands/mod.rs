//! One module per subcommand other than `serve`.

pub(crate) mod check;
pub(crate) mod hash_password;
pub(crate) mod seed;
pub(crate) mod sweep;
