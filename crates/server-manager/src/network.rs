//! 네트워크/포트 정책 결정
//!
//! 서버마다 호스트 포트를 바인딩할지, 컨테이너가 자체 주소를 받는
//! 네트워크(macvlan, ipvlan)에 붙을지를 결정합니다.
//!
//! [`resolve`]는 순수 함수입니다. 메타데이터가 읽기 사이에 바뀔 수 있으므로
//! 결과를 캐시하지 않고 스펙을 만들 때마다 새로 계산합니다.

use cubehost_core::types::{NetworkDecision, ServerMetadata};

/// Bedrock 서버의 기본 UDP 포트
pub const SERVICE_PORT: u16 = 19132;

/// 네트워크 미지정 시 사용하는 모드
pub const DEFAULT_NETWORK_MODE: &str = "bridge";

/// 컨테이너가 직접 라우팅 가능한 주소를 받는 네트워크 드라이버
const DIRECT_NETWORK_MODES: &[&str] = &["macvlan", "ipvlan"];

/// 메타데이터와 전역 기본 네트워크로부터 네트워크 결정을 계산합니다.
///
/// - 유효 네트워크 = 메타데이터 값, 없으면 전역 기본값, 둘 다 없으면 bridge
/// - 이름에 `macvlan`/`ipvlan`이 (대소문자 무시) 포함되면 포트 매핑 불필요
/// - 그 외 모든 경우(알 수 없는 이름 포함)는 포트 매핑 필요
pub fn resolve(metadata: &ServerMetadata, default_network: &str) -> NetworkDecision {
    let effective = metadata
        .network
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| Some(default_network.trim()).filter(|n| !n.is_empty()));

    let Some(network) = effective else {
        return NetworkDecision {
            network_mode: DEFAULT_NETWORK_MODE.to_owned(),
            requires_port_mapping: true,
            exposed_port: Some(metadata.port.unwrap_or(SERVICE_PORT)),
        };
    };

    if is_direct_network(network) {
        NetworkDecision {
            network_mode: network.to_owned(),
            requires_port_mapping: false,
            exposed_port: None,
        }
    } else {
        NetworkDecision {
            network_mode: network.to_owned(),
            requires_port_mapping: true,
            exposed_port: Some(metadata.port.unwrap_or(SERVICE_PORT)),
        }
    }
}

/// 네트워크 이름이 직접 주소 지정 가능한 드라이버를 가리키는지 확인합니다.
pub fn is_direct_network(network: &str) -> bool {
    let lower = network.to_ascii_lowercase();
    DIRECT_NETWORK_MODES.iter().any(|mode| lower.contains(mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survival() -> ServerMetadata {
        let mut meta = ServerMetadata::new("survival", "Survival");
        meta.version = Some("LATEST".to_owned());
        meta.memory = Some(2_147_483_648);
        meta
    }

    #[test]
    fn absent_network_uses_bridge_with_service_port() {
        let decision = resolve(&survival(), "");
        assert_eq!(
            decision,
            NetworkDecision {
                network_mode: "bridge".to_owned(),
                requires_port_mapping: true,
                exposed_port: Some(19132),
            }
        );
    }

    #[test]
    fn macvlan_network_skips_port_mapping() {
        let mut meta = survival();
        meta.network = Some("minecraft-macvlan".to_owned());
        let decision = resolve(&meta, "");
        assert_eq!(
            decision,
            NetworkDecision {
                network_mode: "minecraft-macvlan".to_owned(),
                requires_port_mapping: false,
                exposed_port: None,
            }
        );
    }

    #[test]
    fn direct_modes_are_case_insensitive() {
        for name in ["MACVLAN", "lan-IpVlan-01", "my_macvlan_net", "ipvlan"] {
            assert!(is_direct_network(name), "{name} should be direct");
        }
    }

    #[test]
    fn other_modes_require_port_mapping() {
        for name in ["bridge", "host", "overlay-net", "mc", "vlan", "mac-vlan"] {
            let mut meta = survival();
            meta.network = Some(name.to_owned());
            let decision = resolve(&meta, "");
            assert!(decision.requires_port_mapping, "{name} should map ports");
            assert_eq!(decision.network_mode, name);
        }
    }

    #[test]
    fn global_default_applies_when_metadata_has_none() {
        let decision = resolve(&survival(), "lan-macvlan");
        assert_eq!(decision.network_mode, "lan-macvlan");
        assert!(!decision.requires_port_mapping);
    }

    #[test]
    fn metadata_network_overrides_global_default() {
        let mut meta = survival();
        meta.network = Some("custom-bridge".to_owned());
        let decision = resolve(&meta, "lan-macvlan");
        assert_eq!(decision.network_mode, "custom-bridge");
        assert!(decision.requires_port_mapping);
    }

    #[test]
    fn empty_metadata_network_falls_back_to_default() {
        let mut meta = survival();
        meta.network = Some("  ".to_owned());
        let decision = resolve(&meta, "");
        assert_eq!(decision.network_mode, "bridge");
    }

    #[test]
    fn stored_port_overrides_service_port_on_bridge() {
        let mut meta = survival();
        meta.port = Some(19133);
        let decision = resolve(&meta, "");
        assert_eq!(decision.exposed_port, Some(19133));
    }

    #[test]
    fn stored_port_is_ignored_on_direct_network() {
        let mut meta = survival();
        meta.port = Some(19133);
        meta.network = Some("mc-ipvlan".to_owned());
        let decision = resolve(&meta, "");
        assert_eq!(decision.exposed_port, None);
    }

    #[test]
    fn resolve_is_pure() {
        let meta = survival();
        assert_eq!(resolve(&meta, "x"), resolve(&meta, "x"));
    }
}
