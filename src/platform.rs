//! 启动时使用的主机信息：下载目录与可访问地址。

use std::net::IpAddr;
use std::path::PathBuf;
use tracing::debug;

/// 系统下载目录，未知时退回 `~/Downloads`。
pub fn default_downloads_dir() -> Option<PathBuf> {
    dirs::download_dir().or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
}

/// 非回环网卡地址，IPv4 在前。
pub fn local_network_addresses() -> Vec<IpAddr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(err) => {
            debug!(error = %err, "failed to enumerate network interfaces");
            return Vec::new();
        }
    };
    let mut addresses: Vec<IpAddr> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| iface.ip())
        .filter(|ip| match ip {
            IpAddr::V4(v4) => !v4.is_link_local(),
            IpAddr::V6(v6) => !v6.is_unicast_link_local(),
        })
        .collect();
    addresses.sort_by_key(|ip| (ip.is_ipv6(), *ip));
    addresses.dedup();
    addresses
}

/// 启动横幅中展示的访问地址。
pub fn display_urls(bind: IpAddr, port: u16) -> Vec<String> {
    let format_url = |ip: IpAddr| match ip {
        IpAddr::V4(v4) => format!("http://{v4}:{port}/"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{port}/"),
    };
    if !bind.is_unspecified() {
        return vec![format_url(bind)];
    }

    let mut urls = vec![format_url(match bind {
        IpAddr::V4(_) => IpAddr::from([127, 0, 0, 1]),
        IpAddr::V6(_) => IpAddr::from(std::net::Ipv6Addr::LOCALHOST),
    })];
    urls.extend(
        local_network_addresses()
            .into_iter()
            .filter(|ip| bind.is_ipv6() || ip.is_ipv4())
            .map(format_url),
    );
    urls
}
