//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                                       |
//! |-----------|--------------------------------------------------------|
//! | `serve`   | `Serve`, `Init`                                        |
//! | `auth`    | `Signup`, `Login`, `Logout`, `Whoami`                  |
//! | `tasks`   | `Board`, `Show`, `Add`, `Edit`, `Move`, `Delete`       |
//! | `config`  | `Config`                                               |

pub mod auth;
pub mod config;
pub mod serve;
pub mod tasks;

pub use auth::{cmd_login, cmd_logout, cmd_signup, cmd_whoami};
pub use config::cmd_config;
pub use serve::{cmd_init, cmd_serve};
pub use tasks::{cmd_add, cmd_board, cmd_delete, cmd_edit, cmd_move, cmd_show};
