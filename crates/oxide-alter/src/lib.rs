//! Schema model comparison and alteration planning.
//!
//! `oxide-alter` takes two schema models, the current one and the desired
//! one, and produces an ordered, platform-aware alteration script that turns
//! the first into the second. It does not talk to a database and it does not
//! generate SQL; an executor outside this crate turns each step into
//! statements for its platform.
//!
//! # Architecture
//!
//! - **Schema** - The model: tables, columns, indexes and foreign keys
//! - **Validate** - Structural checks every model passes before comparison
//! - **Capability** - What a target platform can alter in place
//! - **Compare** - Diffs two models into an unordered set of typed changes
//! - **Plan** - Sequences changes into phases, working around missing capabilities
//! - **State** - Replays a script onto a model, the reference meaning of every step
//!
//! # Example
//!
//! ```rust
//! use oxide_alter::prelude::*;
//!
//! let old = Database::new("shop").table(
//!     Table::new("orders")
//!         .column(Column::new("id", LogicalType::Integer).primary_key().required()),
//! );
//! let new = Database::new("shop").table(
//!     Table::new("orders")
//!         .column(Column::new("id", LogicalType::Integer).primary_key().required())
//!         .column(Column::new("note", LogicalType::Varchar).size(200)),
//! );
//!
//! let script = oxide_alter::alter(&old, &new, &PlatformInfo::postgresql()).unwrap();
//! assert_eq!(script.phases.len(), 1);
//! assert_eq!(script.phases[0].stage, Stage::AddColumns);
//! ```

pub mod capability;
pub mod change;
pub mod compare;
pub mod error;
pub mod plan;
pub mod schema;
pub mod state;
pub mod validate;

pub use compare::compare;
pub use plan::plan;

use crate::capability::Capabilities;
use crate::compare::ModelComparator;
use crate::error::Result;
use crate::plan::{AlterationPlanner, AlterationScript};
use crate::schema::Database;

/// Compares `old` with `new` and plans the alteration for `caps`.
pub fn alter(old: &Database, new: &Database, caps: &dyn Capabilities) -> Result<AlterationScript> {
    let changes = ModelComparator::new(caps).compare(old, new)?;
    AlterationPlanner::new(caps).plan(&changes)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::capability::{Capabilities, Capability, DroppedKeyValues, PlatformInfo};
    pub use crate::change::{Change, ChangeKind, ChangeSet};
    pub use crate::compare::ModelComparator;
    pub use crate::error::{
        AlterError, LossKind, LossyOperation, Result, UnsupportedOperation, ValidationError,
    };
    pub use crate::plan::{
        AlterationPlanner, AlterationScript, Fill, Phase, PlannerOptions, Stage, Step,
    };
    pub use crate::schema::{
        Column, Database, ForeignKey, ForeignKeyAction, Index, LogicalType, Reference, Sizing,
        Table, TypedDefault,
    };
    pub use crate::state::SchemaState;
    pub use crate::validate::validate;
}
