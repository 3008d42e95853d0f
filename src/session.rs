//! Session matching: is this host among a volume's active sessions?

use crate::types::{Host, Volume};

/// Whether `host` appears among the volume's active iSCSI or FC sessions.
///
/// iSCSI sessions match on initiator name or on the session's initiator IP
/// being one of the host's IPv4 addresses. FC sessions match on WWPN with `:`
/// separators removed. A host with no recorded initiators is never attached.
pub fn is_host_attached(volume: &Volume, host: &Host) -> bool {
    if !host.has_initiators() {
        return false;
    }

    let iscsi: Vec<&str> = host.initiators_for("iscsi").collect();
    let fc: Vec<&str> = host.initiators_for("fc").collect();

    let iscsi_match = volume.iscsi_sessions.iter().any(|session| {
        let name = session.initiator_name.trim();
        let by_name = !name.is_empty() && iscsi.contains(&name);
        let ip = session.initiator_ip.trim();
        let by_ip = !ip.is_empty()
            && host
                .network_interfaces
                .iter()
                .any(|iface| iface.address_v4.trim() == ip);
        by_name || by_ip
    });
    if iscsi_match {
        return true;
    }

    volume.fc_sessions.iter().any(|session| {
        let wwpn = session.initiator_wwpn.replace(':', "");
        let wwpn = wwpn.trim();
        !wwpn.is_empty() && fc.contains(&wwpn)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FcSession, Initiator, IscsiSession, NetworkInterface};

    fn host() -> Host {
        Host {
            uuid: "host-1".into(),
            initiators: vec![
                Initiator {
                    access_protocol: "iscsi".into(),
                    init: vec![" iqn.1994-05.com.redhat:host1 ".into()],
                },
                Initiator {
                    access_protocol: "fc".into(),
                    init: vec!["10000000c9aabbcc".into()],
                },
            ],
            network_interfaces: vec![NetworkInterface {
                name: "eth0".into(),
                address_v4: "10.0.0.5".into(),
                mask_v4: "255.255.255.0".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn iscsi_name_match_is_trimmed() {
        let vol = Volume {
            iscsi_sessions: vec![IscsiSession {
                initiator_name: "iqn.1994-05.com.redhat:host1".into(),
                initiator_ip: String::new(),
            }],
            ..Default::default()
        };
        assert!(is_host_attached(&vol, &host()));
    }

    #[test]
    fn iscsi_ip_match() {
        let vol = Volume {
            iscsi_sessions: vec![IscsiSession {
                initiator_name: "iqn.other".into(),
                initiator_ip: "10.0.0.5".into(),
            }],
            ..Default::default()
        };
        assert!(is_host_attached(&vol, &host()));
    }

    #[test]
    fn fc_wwpn_separators_stripped() {
        let vol = Volume {
            fc_sessions: vec![FcSession {
                initiator_wwpn: "10:00:00:00:c9:aa:bb:cc ".into(),
            }],
            ..Default::default()
        };
        assert!(is_host_attached(&vol, &host()));
    }

    #[test]
    fn other_host_sessions_do_not_match() {
        let vol = Volume {
            iscsi_sessions: vec![IscsiSession {
                initiator_name: "iqn.other".into(),
                initiator_ip: "10.0.0.99".into(),
            }],
            fc_sessions: vec![FcSession {
                initiator_wwpn: "20:00:00:00:c9:00:00:01".into(),
            }],
            ..Default::default()
        };
        assert!(!is_host_attached(&vol, &host()));
    }

    #[test]
    fn host_without_initiators_is_not_attached() {
        let vol = Volume {
            iscsi_sessions: vec![IscsiSession {
                initiator_name: "iqn.any".into(),
                initiator_ip: "10.0.0.5".into(),
            }],
            ..Default::default()
        };
        let bare = Host {
            network_interfaces: host().network_interfaces,
            ..Default::default()
        };
        assert!(!is_host_attached(&vol, &bare));
    }
}
