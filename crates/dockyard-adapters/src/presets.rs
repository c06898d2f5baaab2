use crate::container::{ContainerFields, ContainerUnit, ReadyMode};
use dockyard_core::CoreError;
use dockyard_schema::UnitSpec;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Defaults for a service kind expressed as a preconfigured container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePreset {
    pub kind: &'static str,
    pub description: &'static str,
    pub image: &'static str,
    pub port: u16,
    pub user: &'static str,
    pub password: &'static str,
    pub database: &'static str,
}

pub const SERVICE_PRESETS: &[ServicePreset] = &[
    ServicePreset {
        kind: "postgres",
        description: "PostgreSQL database",
        image: "postgres:16-alpine",
        port: 5432,
        user: "dockyard",
        password: "dockyard",
        database: "dockyard",
    },
    ServicePreset {
        kind: "mongo",
        description: "MongoDB database",
        image: "mongo:7",
        port: 27017,
        user: "dockyard",
        password: "dockyard",
        database: "dockyard",
    },
    ServicePreset {
        kind: "minio",
        description: "S3-compatible object storage",
        image: "bitnami/minio:latest",
        port: 9000,
        user: "dockyard",
        password: "dockyard-secret",
        database: "",
    },
];

pub fn get_preset(kind: &str) -> Option<&'static ServicePreset> {
    SERVICE_PRESETS.iter().find(|p| p.kind == kind)
}

/// Fields shared by every preset kind; all are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PresetFields {
    image: Option<String>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    /// Object-storage bucket created at startup.
    bucket: Option<String>,
    env: BTreeMap<String, String>,
    alias: Option<String>,
    startup_timeout: Option<String>,
}

fn build(spec: &UnitSpec, preset: &'static ServicePreset) -> Result<ContainerUnit, CoreError> {
    let f: PresetFields = spec.decode()?;
    if f.bucket.is_some() && preset.kind != "minio" {
        return Err(CoreError::Config(format!(
            "unit '{}': 'bucket' is only valid for minio units",
            spec.name
        )));
    }
    let user = f.user.unwrap_or_else(|| preset.user.to_owned());
    let password = f.password.unwrap_or_else(|| preset.password.to_owned());
    let database = f.database.unwrap_or_else(|| preset.database.to_owned());

    let mut env = BTreeMap::new();
    let mut extra = BTreeMap::from([
        ("user".to_owned(), user.clone()),
        ("password".to_owned(), password.clone()),
    ]);
    match preset.kind {
        "postgres" => {
            env.insert("POSTGRES_USER".to_owned(), user.clone());
            env.insert("POSTGRES_PASSWORD".to_owned(), password.clone());
            env.insert("POSTGRES_DB".to_owned(), database.clone());
            extra.insert(
                "connection_string".to_owned(),
                format!("postgres://{user}:{password}@{{host}}:{{port}}/{database}"),
            );
            extra.insert("database".to_owned(), database);
        }
        "mongo" => {
            env.insert("MONGO_INITDB_ROOT_USERNAME".to_owned(), user.clone());
            env.insert("MONGO_INITDB_ROOT_PASSWORD".to_owned(), password.clone());
            env.insert("MONGO_INITDB_DATABASE".to_owned(), database.clone());
            extra.insert(
                "connection_string".to_owned(),
                format!("mongodb://{user}:{password}@{{host}}:{{port}}/{database}?authSource=admin"),
            );
            extra.insert("database".to_owned(), database);
        }
        _ => {
            env.insert("MINIO_ROOT_USER".to_owned(), user.clone());
            env.insert("MINIO_ROOT_PASSWORD".to_owned(), password.clone());
            extra.insert("endpoint".to_owned(), "http://{host}:{port}".to_owned());
            extra.insert("access_key".to_owned(), user);
            extra.insert("secret_key".to_owned(), password);
            if let Some(bucket) = f.bucket {
                env.insert("MINIO_DEFAULT_BUCKETS".to_owned(), bucket.clone());
                extra.insert("bucket".to_owned(), bucket);
            }
        }
    }
    // User-supplied variables win over the preset's.
    env.extend(f.env);

    let fields = ContainerFields {
        image: f.image.unwrap_or_else(|| preset.image.to_owned()),
        ports: vec![preset.port],
        env,
        command: None,
        alias: f.alias,
        ready: Some(ReadyMode::Tcp),
        startup_timeout: f.startup_timeout,
    };
    ContainerUnit::new(&spec.name, preset.kind, fields, extra)
}

pub fn postgres(spec: &UnitSpec) -> Result<ContainerUnit, CoreError> {
    build(spec, &SERVICE_PRESETS[0])
}

pub fn mongo(spec: &UnitSpec) -> Result<ContainerUnit, CoreError> {
    build(spec, &SERVICE_PRESETS[1])
}

pub fn minio(spec: &UnitSpec) -> Result<ContainerUnit, CoreError> {
    build(spec, &SERVICE_PRESETS[2])
}
