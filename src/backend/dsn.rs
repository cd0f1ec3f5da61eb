//! SQL driver selection and connection parameters

use crate::core::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::ConnectOptions;
use std::fmt;
use std::str::FromStr;

/// Supported SQL drivers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Postgres,
    Sqlite,
}

impl Driver {
    /// Bind placeholder for the 1-based parameter `index`
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Driver::Postgres => format!("${}", index),
            Driver::Sqlite => "?".to_string(),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Postgres => write!(f, "postgres"),
            Driver::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Driver::Postgres),
            "sqlite" => Ok(Driver::Sqlite),
            other => Err(format!("unknown driver '{}' (expected postgres or sqlite)", other)),
        }
    }
}

/// Connection parameters: `[server, username, password, database]`
///
/// For SQLite only `database` is used, as the path to the database file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[String; 4]", into = "[String; 4]")]
pub struct Dsn {
    pub server: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Dsn {
    pub fn new(server: &str, username: &str, password: &str, database: &str) -> Self {
        Self {
            server: server.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        }
    }

    /// SQLite database at `path`
    pub fn sqlite(path: &str) -> Self {
        Self::new("localhost", "", "", path)
    }

    /// Connect options for `driver`
    ///
    /// Postgres parameters go through [`PgConnectOptions`], so credentials
    /// never need escaping by hand. `server` may carry a `:port` suffix.
    pub fn connect_options(&self, driver: Driver) -> Result<AnyConnectOptions> {
        if self.database.is_empty() {
            return Err(ServiceError::config("dsn", "database must not be empty"));
        }
        let options = match driver {
            Driver::Postgres => {
                let mut pg = PgConnectOptions::new().database(&self.database);
                pg = match self.server.rsplit_once(':') {
                    Some((host, port)) => match port.parse::<u16>() {
                        Ok(port) => pg.host(host).port(port),
                        Err(_) => {
                            return Err(ServiceError::config(
                                "dsn",
                                format!("'{}' is not a valid port", port),
                            ))
                        }
                    },
                    None => pg.host(&self.server),
                };
                if !self.username.is_empty() {
                    pg = pg.username(&self.username);
                }
                if !self.password.is_empty() {
                    pg = pg.password(&self.password);
                }
                AnyConnectOptions::from_url(&pg.to_url_lossy())
            }
            Driver::Sqlite => format!("sqlite:{}?mode=rwc", self.database).parse::<AnyConnectOptions>(),
        };
        options.map_err(|e| ServiceError::config("dsn", e.to_string()))
    }
}

impl From<[String; 4]> for Dsn {
    fn from([server, username, password, database]: [String; 4]) -> Self {
        Self {
            server,
            username,
            password,
            database,
        }
    }
}

impl From<Dsn> for [String; 4] {
    fn from(dsn: Dsn) -> Self {
        [dsn.server, dsn.username, dsn.password, dsn.database]
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dsn")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsn_from_yaml_list() {
        let dsn: Dsn = serde_yaml::from_str("[db.local, reader, secret, warehouse]").unwrap();
        assert_eq!(dsn.server, "db.local");
        assert_eq!(dsn.database, "warehouse");
        assert!(serde_yaml::from_str::<Dsn>("[db.local, reader]").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let dsn = Dsn::new("db", "reader", "hunter2", "warehouse");
        let shown = format!("{:?}", dsn);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("reader"));
    }

    #[test]
    fn test_postgres_options_carry_credentials() {
        let dsn = Dsn::new("db.local:5433", "svc", "p@ss/w:rd", "warehouse");
        let any = dsn.connect_options(Driver::Postgres).unwrap();
        assert_eq!(any.database_url.scheme(), "postgres");
        assert!(!any.database_url.as_str().contains("p@ss/w:rd"));

        let pg = PgConnectOptions::try_from(&any).unwrap();
        assert_eq!(pg.get_host(), "db.local");
        assert_eq!(pg.get_port(), 5433);
        assert_eq!(pg.get_username(), "svc");
        assert_eq!(pg.get_database(), Some("warehouse"));
    }

    #[test]
    fn test_postgres_rejects_bad_port() {
        let err = Dsn::new("db.local:web", "svc", "pw", "warehouse")
            .connect_options(Driver::Postgres)
            .unwrap_err();
        assert!(err.to_string().contains("not a valid port"));
    }

    #[test]
    fn test_empty_database_rejected() {
        let err = Dsn::new("db.local", "svc", "pw", "")
            .connect_options(Driver::Postgres)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_sqlite_options_use_database_path() {
        let any = Dsn::sqlite("/tmp/service.db")
            .connect_options(Driver::Sqlite)
            .unwrap();
        assert_eq!(any.database_url.scheme(), "sqlite");
        assert_eq!(any.database_url.path(), "/tmp/service.db");
    }

    #[test]
    fn test_driver_parsing_and_placeholders() {
        assert_eq!("PostgreSQL".parse::<Driver>().unwrap(), Driver::Postgres);
        assert!("mssql".parse::<Driver>().is_err());
        assert_eq!(Driver::Postgres.placeholder(2), "$2");
        assert_eq!(Driver::Sqlite.placeholder(2), "?");
    }
}
