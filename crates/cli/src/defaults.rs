use crate::error::CliError;
use ini::{Ini, Properties};
use std::str::FromStr;

/// Values read from a mysql-style defaults file. Every field is optional;
/// command-line flags win over anything found here.
///
/// `[client]` and `[mysqldump]` supply connection settings the same way
/// the stock MySQL tools read them; `[paradump]` supplies tool options.
#[derive(Debug, Default, PartialEq)]
pub struct IniDefaults {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,

    pub threads: Option<usize>,
    pub chunk_size: Option<u64>,
    pub output_chunk_size: Option<u64>,
    pub channel_buffer_size: Option<usize>,
    pub lock_tables: Option<bool>,
    pub tables_without_uniquekey: Option<String>,
    pub destination: Option<String>,
    pub add_drop_table: Option<bool>,
    pub get_master_status: Option<bool>,
    pub get_slave_status: Option<bool>,
    pub skip_use_database: Option<bool>,
    pub compress: Option<bool>,
    pub compress_level: Option<u32>,
    pub isolation_level: Option<String>,
    pub where_option: Option<String>,
    pub tables: Option<String>,
    pub databases: Option<String>,
    pub all_databases: Option<bool>,
}

pub fn load(path: &str) -> Result<IniDefaults, CliError> {
    let file = Ini::load_from_file(path)
        .map_err(|e| CliError::DefaultsFileParse(format!("{path}: {e}")))?;
    parse(&file)
}

fn parse(file: &Ini) -> Result<IniDefaults, CliError> {
    let mut defaults = IniDefaults::default();
    for (section, properties) in file.iter() {
        match section {
            Some("client") | Some("mysqldump") => {
                apply_connection_section(properties, &mut defaults)?
            }
            Some("paradump") => apply_tool_section(properties, &mut defaults)?,
            _ => {}
        }
    }
    Ok(defaults)
}

fn apply_connection_section(
    properties: &Properties,
    defaults: &mut IniDefaults,
) -> Result<(), CliError> {
    for (key, value) in properties.iter() {
        match key {
            "user" => defaults.user = Some(value.to_string()),
            "password" => defaults.password = Some(value.to_string()),
            "host" => defaults.host = Some(value.to_string()),
            "port" => defaults.port = Some(number(key, value)?),
            "socket" => defaults.socket = Some(value.to_string()),
            // The stock tools carry plenty of keys we have no use for.
            _ => {}
        }
    }
    Ok(())
}

fn apply_tool_section(
    properties: &Properties,
    defaults: &mut IniDefaults,
) -> Result<(), CliError> {
    for (key, value) in properties.iter() {
        match key {
            "mysql-user" => defaults.user = Some(value.to_string()),
            "mysql-password" => defaults.password = Some(value.to_string()),
            "mysql-host" => defaults.host = Some(value.to_string()),
            "mysql-port" => defaults.port = Some(number(key, value)?),
            "mysql-socket" => defaults.socket = Some(value.to_string()),
            "threads" => defaults.threads = Some(number(key, value)?),
            "chunk-size" => defaults.chunk_size = Some(number(key, value)?),
            "output-chunk-size" => defaults.output_chunk_size = Some(number(key, value)?),
            "channel-buffer-size" => defaults.channel_buffer_size = Some(number(key, value)?),
            "lock-tables" => defaults.lock_tables = Some(boolean(key, value)?),
            "tables-without-uniquekey" => {
                defaults.tables_without_uniquekey = Some(value.to_string())
            }
            "destination" => defaults.destination = Some(value.to_string()),
            "add-drop-table" => defaults.add_drop_table = Some(boolean(key, value)?),
            "get-master-status" => defaults.get_master_status = Some(boolean(key, value)?),
            "get-slave-status" => defaults.get_slave_status = Some(boolean(key, value)?),
            "skip-use-database" => defaults.skip_use_database = Some(boolean(key, value)?),
            "compress" => defaults.compress = Some(boolean(key, value)?),
            "compress-level" => defaults.compress_level = Some(number(key, value)?),
            "isolation-level" => defaults.isolation_level = Some(value.to_string()),
            "where" => defaults.where_option = Some(value.to_string()),
            "tables" => defaults.tables = Some(value.to_string()),
            "databases" => defaults.databases = Some(value.to_string()),
            "all-databases" => defaults.all_databases = Some(boolean(key, value)?),
            other => {
                tracing::warn!(key = other, "Unknown option in [paradump], ignoring.");
            }
        }
    }
    Ok(())
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, CliError> {
    value.trim().parse().map_err(|_| {
        CliError::DefaultsFileParse(format!("{key} = {value} is not a valid number"))
    })
}

fn boolean(key: &str, value: &str) -> Result<bool, CliError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(CliError::DefaultsFileParse(format!(
            "{key} = {value} is not a valid boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parsed(content: &str) -> IniDefaults {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        load(file.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_client_section_supplies_connection_defaults() {
        let defaults = parsed(
            "[client]\n\
             user = backup\n\
             password = secret\n\
             host = db.internal\n\
             port = 3307\n\
             socket = /tmp/mysql.sock\n",
        );
        assert_eq!(defaults.user.as_deref(), Some("backup"));
        assert_eq!(defaults.password.as_deref(), Some("secret"));
        assert_eq!(defaults.host.as_deref(), Some("db.internal"));
        assert_eq!(defaults.port, Some(3307));
        assert_eq!(defaults.socket.as_deref(), Some("/tmp/mysql.sock"));
    }

    #[test]
    fn test_tool_section_options() {
        let defaults = parsed(
            "[paradump]\n\
             threads = 8\n\
             chunk-size = 50000\n\
             lock-tables = false\n\
             compress = 1\n\
             compress-level = 6\n\
             tables-without-uniquekey = single-chunk\n\
             destination = /backups/today\n",
        );
        assert_eq!(defaults.threads, Some(8));
        assert_eq!(defaults.chunk_size, Some(50_000));
        assert_eq!(defaults.lock_tables, Some(false));
        assert_eq!(defaults.compress, Some(true));
        assert_eq!(defaults.compress_level, Some(6));
        assert_eq!(
            defaults.tables_without_uniquekey.as_deref(),
            Some("single-chunk")
        );
        assert_eq!(defaults.destination.as_deref(), Some("/backups/today"));
    }

    #[test]
    fn test_slave_status_key_only_touches_slave_status() {
        let defaults = parsed(
            "[paradump]\n\
             get-slave-status = true\n",
        );
        assert_eq!(defaults.get_slave_status, Some(true));
        assert_eq!(defaults.lock_tables, None);
    }

    #[test]
    fn test_later_section_overrides_earlier_one() {
        let defaults = parsed(
            "[client]\n\
             user = client-user\n\
             [mysqldump]\n\
             user = dump-user\n",
        );
        assert_eq!(defaults.user.as_deref(), Some("dump-user"));
    }

    #[test]
    fn test_bad_number_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[paradump]\nthreads = many\n").unwrap();
        assert!(load(file.path().to_str().unwrap()).is_err());
    }
}
