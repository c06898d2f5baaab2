//! Built-in adapters for Dockyard.
//!
//! Implements the unit and test contracts of `dockyard-core` for the kinds
//! shipped with the tool: a generic `container` unit, `postgres`, `mongo` and
//! `minio` presets on top of it, and the `http` test kind.

pub mod container;
pub mod http;
pub mod presets;

pub use container::{ContainerFields, ContainerUnit, ReadyMode};
pub use http::HttpTest;
pub use presets::{ServicePreset, SERVICE_PRESETS};

use dockyard_core::{Registries, SuiteTest, Unit};

fn boxed_unit(unit: ContainerUnit) -> Box<dyn Unit> {
    Box::new(unit)
}

/// Register every built-in kind.
pub fn register_builtin(registries: &mut Registries) {
    registries.register_unit("container", |spec| ContainerUnit::from_spec(spec).map(boxed_unit));
    registries.register_unit("postgres", |spec| presets::postgres(spec).map(boxed_unit));
    registries.register_unit("mongo", |spec| presets::mongo(spec).map(boxed_unit));
    registries.register_unit("minio", |spec| presets::minio(spec).map(boxed_unit));
    registries.register_test("http", |spec| {
        HttpTest::from_spec(spec).map(|t| Box::new(t) as Box<dyn SuiteTest>)
    });
}
