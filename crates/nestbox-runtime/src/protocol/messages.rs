//! Encoders and decoders for the compound messages of the protocol.
//!
//! A container spec travels as:
//!
//! ```text
//! caps <name>* end-caps
//! mounts (<source> <target>)* end-mounts
//! env <KEY=VALUE>* end-env
//! no-new-privs-on | no-new-privs-off
//! seccomp-on | seccomp-off
//! ```
//!
//! A creation body is `init-command <argv>* end-init-command` followed by
//! a container spec.

use std::io::{Read, Write};

use nestbox_common::types::{ContainerId, MountRequest};
use nestbox_core::capability::Capability;
use nix::unistd::Pid;

use super::session::Session;
use super::tag::Tag;
use super::ProtocolError;
use crate::spec::{ContainerSpec, CreationSpec};

/// Sends a container id argument.
///
/// # Errors
///
/// Fails if the connection cannot be written.
pub fn send_id<S: Read + Write>(session: &mut Session<S>, id: &ContainerId) -> Result<(), ProtocolError> {
    session.send_argument(id.as_str())
}

/// Reads a container id argument, which must be an absolute path.
///
/// # Errors
///
/// Fails on a relative path or a non-argument message.
pub fn read_id<S: Read + Write>(session: &mut Session<S>) -> Result<ContainerId, ProtocolError> {
    let raw = session.read_argument()?;
    ContainerId::parse(raw).map_err(|e| ProtocolError::InvalidArgument {
        field: "container id",
        reason: e.to_string(),
    })
}

/// Sends a pid as a decimal argument.
///
/// # Errors
///
/// Fails if the connection cannot be written.
pub fn send_pid<S: Read + Write>(session: &mut Session<S>, pid: Pid) -> Result<(), ProtocolError> {
    session.send_argument(&pid.as_raw().to_string())
}

/// Reads a positive decimal pid argument.
///
/// # Errors
///
/// Fails if the argument is not a positive integer.
pub fn read_pid<S: Read + Write>(session: &mut Session<S>) -> Result<Pid, ProtocolError> {
    let raw = session.read_argument()?;
    match raw.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Pid::from_raw(pid)),
        _ => Err(ProtocolError::InvalidArgument {
            field: "pid",
            reason: format!("{raw:?} is not a positive process id"),
        }),
    }
}

/// Sends a container spec.
///
/// # Errors
///
/// Fails if any part cannot be sent.
pub fn send_container_spec<S: Read + Write>(
    session: &mut Session<S>,
    spec: &ContainerSpec,
) -> Result<(), ProtocolError> {
    session.send_section(
        Tag::Capabilities,
        spec.dropped_capabilities.iter().map(|cap| cap.name()),
        Tag::EndCapabilities,
    )?;
    send_mount_list(session, &spec.extra_mounts)?;
    session.send_section(Tag::Environment, &spec.environment, Tag::EndEnvironment)?;
    session.send_flag(spec.no_new_privs, Tag::NoNewPrivsOn, Tag::NoNewPrivsOff)?;
    session.send_flag(spec.seccomp_enabled, Tag::SeccompOn, Tag::SeccompOff)
}

/// Reads a container spec.
///
/// # Errors
///
/// Fails on an unknown capability name, an unpaired mount entry, or any
/// framing violation.
pub fn read_container_spec<S: Read + Write>(session: &mut Session<S>) -> Result<ContainerSpec, ProtocolError> {
    let dropped_capabilities = session
        .read_section(Tag::Capabilities, Tag::EndCapabilities)?
        .iter()
        .map(|name| {
            Capability::from_name(name).ok_or_else(|| ProtocolError::InvalidArgument {
                field: "capability",
                reason: format!("unknown capability {name:?}"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let extra_mounts = read_mount_list(session)?;
    let environment = session.read_section(Tag::Environment, Tag::EndEnvironment)?;
    let no_new_privs = session.read_flag(Tag::NoNewPrivsOn, Tag::NoNewPrivsOff)?;
    let seccomp_enabled = session.read_flag(Tag::SeccompOn, Tag::SeccompOff)?;
    Ok(ContainerSpec {
        dropped_capabilities,
        extra_mounts,
        environment,
        no_new_privs,
        seccomp_enabled,
    })
}

/// Sends a `mounts ... end-mounts` section.
///
/// # Errors
///
/// Fails if any part cannot be sent.
pub fn send_mount_list<S: Read + Write>(
    session: &mut Session<S>,
    mounts: &[MountRequest],
) -> Result<(), ProtocolError> {
    session.send_section(
        Tag::Mounts,
        mounts.iter().flat_map(|m| [m.source.as_str(), m.target.as_str()]),
        Tag::EndMounts,
    )
}

/// Reads a `mounts ... end-mounts` section of (source, target) pairs.
///
/// # Errors
///
/// Fails if the section holds an odd number of entries or a target with a
/// `..` component.
pub fn read_mount_list<S: Read + Write>(session: &mut Session<S>) -> Result<Vec<MountRequest>, ProtocolError> {
    let flat = session.read_section(Tag::Mounts, Tag::EndMounts)?;
    if flat.len() % 2 != 0 {
        return Err(ProtocolError::InvalidArgument {
            field: "mounts",
            reason: format!("{} entries do not form (source, target) pairs", flat.len()),
        });
    }
    flat.chunks_exact(2)
        .map(|pair| {
            MountRequest::check_target(&pair[1]).map_err(|reason| ProtocolError::InvalidArgument {
                field: "mount target",
                reason,
            })?;
            Ok(MountRequest::new(pair[0].clone(), pair[1].clone()))
        })
        .collect()
}

/// Sends the body that follows a `not-running` reply to `create`.
///
/// # Errors
///
/// Fails if any part cannot be sent.
pub fn send_creation_body<S: Read + Write>(
    session: &mut Session<S>,
    spec: &CreationSpec,
) -> Result<(), ProtocolError> {
    session.send_section(Tag::InitCommand, &spec.command, Tag::EndInitCommand)?;
    send_container_spec(session, &spec.container)
}

/// Reads a creation body for `id`.
///
/// # Errors
///
/// Fails on any decoding error; nothing is staged in that case.
pub fn read_creation_body<S: Read + Write>(
    session: &mut Session<S>,
    id: ContainerId,
) -> Result<CreationSpec, ProtocolError> {
    let command = session.read_section(Tag::InitCommand, Tag::EndInitCommand)?;
    let container = read_container_spec(session)?;
    Ok(CreationSpec::new(id, command, container))
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn pair() -> (Session<UnixStream>, Session<UnixStream>) {
        let (a, b) = UnixStream::pair().unwrap();
        (Session::new(a), Session::new(b))
    }

    fn sample_spec() -> ContainerSpec {
        ContainerSpec {
            dropped_capabilities: vec![Capability::SysAdmin, Capability::NetRaw],
            extra_mounts: vec![
                MountRequest::new("/srv/data", "/data"),
                MountRequest::new("tmpfs", "/scratch"),
            ],
            environment: vec!["PATH=/bin".into(), "HOME=/root".into()],
            no_new_privs: false,
            seccomp_enabled: true,
        }
    }

    #[test]
    fn creation_body_survives_the_wire() {
        let (mut client, mut server) = pair();
        let id = ContainerId::parse("/c1").unwrap();
        let spec = CreationSpec::new(id.clone(), vec!["/bin/true".into()], sample_spec());

        send_creation_body(&mut client, &spec).unwrap();
        let decoded = read_creation_body(&mut server, id).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn empty_argv_decodes_to_keep_alive_loop() {
        let (mut client, mut server) = pair();
        client.send_section(Tag::InitCommand, [""; 0], Tag::EndInitCommand).unwrap();
        send_container_spec(&mut client, &ContainerSpec::default()).unwrap();

        let decoded = read_creation_body(&mut server, ContainerId::parse("/c1").unwrap()).unwrap();
        assert_eq!(decoded.command[0], "/bin/sh");
    }

    #[test]
    fn unknown_capability_is_a_protocol_error() {
        let (mut client, mut server) = pair();
        client
            .send_section(Tag::Capabilities, ["CAP_TELEPORT"], Tag::EndCapabilities)
            .unwrap();
        assert!(matches!(
            read_container_spec(&mut server),
            Err(ProtocolError::InvalidArgument { field: "capability", .. })
        ));
    }

    #[test]
    fn odd_mount_list_is_rejected() {
        let (mut client, mut server) = pair();
        client
            .send_section(Tag::Mounts, ["/srv/data"], Tag::EndMounts)
            .unwrap();
        assert!(read_mount_list(&mut server).is_err());
    }

    #[test]
    fn mount_target_climbing_out_of_root_is_rejected() {
        let (mut client, mut server) = pair();
        client
            .send_section(Tag::Mounts, ["tmpfs", "/../../etc"], Tag::EndMounts)
            .unwrap();
        assert!(matches!(
            read_mount_list(&mut server),
            Err(ProtocolError::InvalidArgument { field: "mount target", .. })
        ));
    }

    #[test]
    fn relative_id_is_rejected() {
        let (mut client, mut server) = pair();
        client.send_argument("c1").unwrap();
        assert!(matches!(
            read_id(&mut server),
            Err(ProtocolError::InvalidArgument { field: "container id", .. })
        ));
    }

    #[test]
    fn pid_must_be_positive() {
        let (mut client, mut server) = pair();
        client.send_argument("0").unwrap();
        client.send_argument("abc").unwrap();
        client.send_argument("4242").unwrap();
        assert!(read_pid(&mut server).is_err());
        assert!(read_pid(&mut server).is_err());
        assert_eq!(read_pid(&mut server).unwrap(), Pid::from_raw(4242));
    }
}
