//! Reusable Cloud SQL database component.
//!
//! Groups a generated password, a private Postgres instance and a database
//! user under one component. Every child is parented to the component and
//! named `<component>/<child>`.

use serde_json::json;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::GraphError;
use crate::graph::{ComponentScope, Deferred, GraphBuilder, Properties, ResourceDeclaration};

use super::kinds;
use super::set_path;

/// Inputs of a [`CloudSqlDatabase`].
#[derive(Debug, Clone)]
pub struct CloudSqlArgs<'a> {
    /// Project hosting the instance.
    pub project: Deferred<String>,
    /// VPC network the instance is reachable from.
    pub vpc_id: Deferred<String>,
    /// Region of the instance.
    pub region: &'a str,
    /// Sizing and naming.
    pub database: &'a DatabaseConfig,
}

/// A password, instance and user declared together.
#[derive(Debug, Clone)]
pub struct CloudSqlDatabase {
    scope: ComponentScope,
    password: ResourceDeclaration,
    instance: ResourceDeclaration,
    user: ResourceDeclaration,
}

impl CloudSqlDatabase {
    /// Declares the component's resources.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Conflict`] if a component with the same name
    /// was already declared.
    pub fn declare(builder: &mut GraphBuilder, args: CloudSqlArgs<'_>) -> Result<Self, GraphError> {
        let db = args.database;
        let scope = ComponentScope::new(kinds::CLOUD_SQL_COMPONENT, &db.name);

        let password = builder.declare(
            kinds::RANDOM_PASSWORD,
            scope.child_name("password"),
            Properties::new()
                .with("length", i64::from(db.password_length))
                .with("special", false),
            scope.options().secret_output("result"),
        )?;

        let instance_name = scope.child_name("db");
        let mut properties = Properties::from_json(json!({
            "name": format!("{}-db", db.name),
            "databaseVersion": db.version,
            "region": args.region,
            "deletionProtection": false,
            "settings": {
                "tier": db.tier,
                "availabilityType": "ZONAL",
                "diskSize": db.disk_size_gb,
                "diskType": "PD_SSD",
                "ipConfiguration": {
                    "ipv4Enabled": false,
                    "requireSsl": true,
                },
                "diskAutoresize": true,
                "diskAutoresizeLimit": db.disk_autoresize_limit,
            },
        }))
        .with("project", args.project.clone());
        let network = args
            .project
            .zip(&args.vpc_id)
            .map(|(project, vpc)| format!("projects/{project}/global/networks/{vpc}"));
        set_path(
            &mut properties,
            kinds::SQL_INSTANCE,
            &instance_name,
            "settings.ipConfiguration.privateNetwork",
            network,
        )?;
        let instance = builder.declare(kinds::SQL_INSTANCE, instance_name, properties, scope.options())?;

        let user = builder.declare(
            kinds::SQL_USER,
            scope.child_name("user"),
            Properties::new()
                .with("name", db.name.as_str())
                .with("instance", instance.output_string("name"))
                .with("password", password.output_string("result"))
                .with("deletionPolicy", "ABANDON")
                .with("project", args.project),
            scope.options(),
        )?;

        info!("Declared database component {}", scope.id());
        Ok(Self {
            scope,
            password,
            instance,
            user,
        })
    }

    /// The component scope.
    #[must_use]
    pub const fn scope(&self) -> &ComponentScope {
        &self.scope
    }

    /// Generated user password. Secret.
    #[must_use]
    pub fn password(&self) -> Deferred<String> {
        self.password.output_string("result")
    }

    /// `project:region:instance`, as expected by the Cloud SQL proxy.
    #[must_use]
    pub fn connection_name(&self) -> Deferred<String> {
        self.instance.output_string("connectionName")
    }

    /// Name of the database user.
    #[must_use]
    pub fn user_name(&self) -> Deferred<String> {
        self.user.output_string("name")
    }

    /// The instance declaration.
    #[must_use]
    pub const fn instance(&self) -> &ResourceDeclaration {
        &self.instance
    }

    /// The user declaration.
    #[must_use]
    pub const fn user(&self) -> &ResourceDeclaration {
        &self.user
    }
}
