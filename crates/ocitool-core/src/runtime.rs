//! Translation of an image config into an OCI runtime bundle `config.json`.

use crate::descriptor::read_blob;
use crate::{CoreError, ResultExt};
use ocitool_schema::media_type::MEDIA_TYPE_IMAGE_CONFIG;
use ocitool_schema::{Descriptor, ImageConfig, SchemaValidator};
use ocitool_store::{clean_path, Walker};
use serde::{Deserialize, Serialize};

pub const RUNTIME_SPEC_VERSION: &str = "1.0.2";

const DEFAULT_CWD: &str = "/";
const DEFAULT_SHELL: &str = "sh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    pub oci_version: String,
    pub process: Process,
    pub root: Root,
    pub platform: RuntimePlatform,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub terminal: bool,
    pub user: User,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    pub cwd: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePlatform {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Linux {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cpu {
    pub shares: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<i64>,
}

/// Load the config blob, check it against the config schema, and decode it.
pub fn find_config<W: Walker>(
    walker: &mut W,
    descriptor: &Descriptor,
    validator: &dyn SchemaValidator,
) -> Result<ImageConfig, CoreError> {
    let path = clean_path(&descriptor.blob_path());
    let data = read_blob(walker, descriptor).with_context(|| format!("{path}: config"))?;
    validator
        .validate(MEDIA_TYPE_IMAGE_CONFIG, &data)
        .with_context(|| format!("{path}: config validation failed"))?;
    serde_json::from_slice(&data).with_context(|| format!("{path}: unable to decode config"))
}

/// Build the runtime configuration for a container whose root filesystem
/// lives at `rootfs`, relative to the bundle directory.
pub fn to_runtime_spec(config: &ImageConfig, rootfs: &str) -> Result<RuntimeSpec, CoreError> {
    if config.os != "linux" {
        return Err(CoreError::UnsupportedOs(config.os.clone()));
    }
    let c = &config.config;

    let mut args: Vec<String> = c.entrypoint.iter().chain(&c.cmd).cloned().collect();
    if args.is_empty() {
        args.push(DEFAULT_SHELL.to_owned());
    }
    let cwd = if c.working_dir.is_empty() {
        DEFAULT_CWD.to_owned()
    } else {
        c.working_dir.clone()
    };

    let mut mounts: Vec<Mount> = c
        .volumes
        .keys()
        .map(|volume| Mount {
            destination: volume.clone(),
            kind: "bind".to_owned(),
            options: vec!["rbind".to_owned()],
        })
        .collect();
    mounts.sort_by(|a, b| a.destination.cmp(&b.destination));

    Ok(RuntimeSpec {
        oci_version: RUNTIME_SPEC_VERSION.to_owned(),
        process: Process {
            terminal: true,
            user: parse_user(&c.user)?,
            args,
            env: c.env.clone(),
            cwd,
        },
        root: Root {
            path: rootfs.to_owned(),
        },
        platform: RuntimePlatform {
            os: config.os.clone(),
            arch: config.architecture.clone(),
        },
        mounts,
        linux: Some(Linux {
            resources: resources(c.cpu_shares, c.memory, c.memory_swap),
        }),
    })
}

/// Only numeric `uid` and `uid:gid` forms can be expressed without reading
/// the image's passwd database.
fn parse_user(user: &str) -> Result<User, CoreError> {
    if user.is_empty() {
        return Ok(User::default());
    }
    if let Ok(uid) = user.parse() {
        return Ok(User { uid, gid: 0 });
    }
    let Some((uid, gid)) = user.split_once(':') else {
        return Err(CoreError::InvalidUser("unsupported format".to_owned()));
    };
    let uid = uid
        .parse()
        .map_err(|_| CoreError::InvalidUser("unsupported uid format".to_owned()))?;
    let gid = gid
        .parse()
        .map_err(|_| CoreError::InvalidUser("unsupported gid format".to_owned()))?;
    Ok(User { uid, gid })
}

fn resources(cpu_shares: i64, memory: i64, swap: i64) -> Option<Resources> {
    let cpu = (cpu_shares > 0).then(|| Cpu {
        shares: cpu_shares as u64,
    });
    let memory = (memory != 0 || swap != 0).then(|| Memory {
        limit: (memory != 0).then_some(memory),
        reservation: (memory != 0).then_some(memory),
        swap: (swap != 0).then_some(swap),
    });
    if cpu.is_none() && memory.is_none() {
        None
    } else {
        Some(Resources { cpu, memory })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocitool_schema::{ContainerConfig, Digest, JsonSchemaValidator};
    use ocitool_store::{CancelToken, PathWalker};
    use std::collections::BTreeMap;
    use std::fs;

    fn linux_config(container: ContainerConfig) -> ImageConfig {
        ImageConfig {
            architecture: "amd64".into(),
            os: "linux".into(),
            config: container,
            ..ImageConfig::default()
        }
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let spec = to_runtime_spec(&linux_config(ContainerConfig::default()), "rootfs").unwrap();
        assert_eq!(spec.oci_version, "1.0.2");
        assert_eq!(spec.process.args, vec!["sh"]);
        assert_eq!(spec.process.cwd, "/");
        assert!(spec.process.terminal);
        assert_eq!(spec.root.path, "rootfs");
        assert_eq!(spec.platform.arch, "amd64");
        assert!(spec.linux.unwrap().resources.is_none());
    }

    #[test]
    fn full_config_is_translated() {
        let mut volumes = BTreeMap::new();
        volumes.insert("/var/log".to_owned(), serde_json::json!({}));
        volumes.insert("/data".to_owned(), serde_json::json!({}));
        let container = ContainerConfig {
            user: "1000:100".into(),
            memory: 1 << 20,
            memory_swap: 2 << 20,
            cpu_shares: 512,
            env: vec!["PATH=/bin".into()],
            entrypoint: vec!["/bin/app".into()],
            cmd: vec!["--serve".into()],
            volumes,
            working_dir: "/srv".into(),
            ..ContainerConfig::default()
        };
        let spec = to_runtime_spec(&linux_config(container), "rootfs").unwrap();
        assert_eq!(spec.process.args, vec!["/bin/app", "--serve"]);
        assert_eq!(spec.process.user, User { uid: 1000, gid: 100 });
        assert_eq!(spec.process.cwd, "/srv");
        assert_eq!(spec.mounts[0].destination, "/data");
        assert_eq!(spec.mounts[1].destination, "/var/log");
        assert_eq!(spec.mounts[0].options, vec!["rbind"]);

        let resources = spec.linux.unwrap().resources.unwrap();
        assert_eq!(resources.cpu.unwrap().shares, 512);
        let memory = resources.memory.unwrap();
        assert_eq!(memory.limit, Some(1 << 20));
        assert_eq!(memory.reservation, Some(1 << 20));
        assert_eq!(memory.swap, Some(2 << 20));
    }

    #[test]
    fn serializes_runtime_field_names() {
        let spec = to_runtime_spec(&linux_config(ContainerConfig::default()), "rootfs").unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["ociVersion"], "1.0.2");
        assert_eq!(json["process"]["user"]["uid"], 0);
        assert!(json.get("mounts").is_none());
    }

    #[test]
    fn non_linux_rejected() {
        let mut config = linux_config(ContainerConfig::default());
        config.os = "windows".into();
        let err = to_runtime_spec(&config, "rootfs").unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedOs(os) if os == "windows"));
    }

    #[test]
    fn user_formats() {
        assert_eq!(parse_user("42").unwrap(), User { uid: 42, gid: 0 });
        assert_eq!(parse_user("").unwrap(), User::default());
        for bad in ["alice", "alice:100", "1000:staff", "1:2:3"] {
            assert!(matches!(parse_user(bad), Err(CoreError::InvalidUser(_))), "{bad}");
        }
    }

    #[test]
    fn finds_and_validates_config_blob() {
        let dir = tempfile::tempdir().unwrap();
        let data = br#"{"architecture":"amd64","os":"linux","config":{"Env":["A=1"]}}"#;
        let digest = Digest::of_bytes(data);
        fs::create_dir_all(dir.path().join("blobs/sha256")).unwrap();
        fs::write(dir.path().join("blobs/sha256").join(digest.encoded()), data).unwrap();
        let desc = Descriptor::new(MEDIA_TYPE_IMAGE_CONFIG, &digest, data.len() as i64);

        let mut walker = PathWalker::new(dir.path(), CancelToken::new());
        let config = find_config(&mut walker, &desc, &JsonSchemaValidator::new()).unwrap();
        assert_eq!(config.config.env, vec!["A=1"]);
    }

    #[test]
    fn bad_env_fails_config_validation() {
        let dir = tempfile::tempdir().unwrap();
        let data = br#"{"architecture":"amd64","os":"linux","config":{"Env":["NOEQUALS"]}}"#;
        let digest = Digest::of_bytes(data);
        fs::create_dir_all(dir.path().join("blobs/sha256")).unwrap();
        fs::write(dir.path().join("blobs/sha256").join(digest.encoded()), data).unwrap();
        let desc = Descriptor::new(MEDIA_TYPE_IMAGE_CONFIG, &digest, data.len() as i64);

        let mut walker = PathWalker::new(dir.path(), CancelToken::new());
        let err = find_config(&mut walker, &desc, &JsonSchemaValidator::new()).unwrap_err();
        assert!(err.to_string().contains("config validation failed"));
    }
}
