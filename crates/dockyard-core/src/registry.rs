use crate::case::SuiteTest;
use crate::unit::Unit;
use crate::CoreError;
use dockyard_schema::{TestSpec, UnitSpec};
use std::collections::BTreeMap;

pub type UnitConstructor = Box<dyn Fn(&UnitSpec) -> Result<Box<dyn Unit>, CoreError> + Send + Sync>;
pub type TestConstructor =
    Box<dyn Fn(&TestSpec) -> Result<Box<dyn SuiteTest>, CoreError> + Send + Sync>;

/// Kind→constructor tables for units and tests, populated by adapter crates
/// at process start. The core only ever looks kinds up here.
#[derive(Default)]
pub struct Registries {
    units: BTreeMap<String, UnitConstructor>,
    tests: BTreeMap<String, TestConstructor>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit kind. A later registration of the same kind replaces
    /// the earlier one.
    pub fn register_unit<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&UnitSpec) -> Result<Box<dyn Unit>, CoreError> + Send + Sync + 'static,
    {
        self.units.insert(kind.to_owned(), Box::new(ctor));
    }

    pub fn register_test<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&TestSpec) -> Result<Box<dyn SuiteTest>, CoreError> + Send + Sync + 'static,
    {
        self.tests.insert(kind.to_owned(), Box::new(ctor));
    }

    pub fn build_unit(&self, spec: &UnitSpec) -> Result<Box<dyn Unit>, CoreError> {
        let ctor = self
            .units
            .get(&spec.kind)
            .ok_or_else(|| CoreError::UnknownKind {
                category: "unit",
                kind: spec.kind.clone(),
                registered: self.unit_kinds().join(", "),
            })?;
        ctor(spec)
    }

    pub fn build_test(&self, spec: &TestSpec) -> Result<Box<dyn SuiteTest>, CoreError> {
        let ctor = self
            .tests
            .get(&spec.kind)
            .ok_or_else(|| CoreError::UnknownKind {
                category: "test",
                kind: spec.kind.clone(),
                registered: self.test_kinds().join(", "),
            })?;
        ctor(spec)
    }

    pub fn unit_kinds(&self) -> Vec<&str> {
        self.units.keys().map(String::as_str).collect()
    }

    pub fn test_kinds(&self) -> Vec<&str> {
        self.tests.keys().map(String::as_str).collect()
    }
}
