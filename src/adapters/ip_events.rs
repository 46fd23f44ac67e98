//! ESP-IDF IP / PPP event bridge.
//!
//! Registers one C handler on the default event loop for `IP_EVENT` and
//! `NETIF_PPP_STATUS` and translates what it sees into [`LinkEvent`]s for
//! the registered [`LinkEventHandler`].  Works for both the Wi-Fi station
//! netif and the PPP netif.

use core::ffi::c_void;
use core::ptr;
use std::net::{Ipv4Addr, Ipv6Addr};

use esp_idf_svc::sys::{
    self, esp_err_t, esp_event_base_t, esp_event_handler_register, esp_netif_dns_info_t,
    esp_netif_get_dns_info, esp_netif_t, ip_event_got_ip6_t, ip_event_got_ip_t, ESP_EVENT_ANY_ID,
    ESP_OK,
};
use log::error;

use crate::app::events::{IpInfo, LinkEvent, LinkEventHandler};
use crate::error::LinkError;

/// Register `handler` for every IP and PPP status event.  The handler is
/// leaked and lives until reset.
pub fn subscribe(handler: LinkEventHandler) -> Result<(), LinkError> {
    let arg = Box::into_raw(Box::new(handler)).cast::<c_void>();

    // SAFETY: `arg` is a leaked, never-freed box, valid for the program's
    // lifetime; the event bases are link-time constants.
    let (ip, ppp) = unsafe {
        (
            esp_event_handler_register(sys::IP_EVENT, ESP_EVENT_ANY_ID, Some(on_event), arg),
            esp_event_handler_register(sys::NETIF_PPP_STATUS, ESP_EVENT_ANY_ID, Some(on_event), arg),
        )
    };
    if ip != ESP_OK as esp_err_t || ppp != ESP_OK as esp_err_t {
        error!("Net: event handler registration failed ({}, {})", ip, ppp);
        return Err(LinkError::InitFailed);
    }
    Ok(())
}

unsafe extern "C" fn on_event(
    arg: *mut c_void,
    base: esp_event_base_t,
    id: i32,
    data: *mut c_void,
) {
    // SAFETY: `arg` was produced by `subscribe` and is never freed; `data`
    // points at the payload type matching `(base, id)`.
    unsafe {
        let handler = &*arg.cast::<LinkEventHandler>();
        if let Some(event) = translate(base, id, data) {
            handler(event);
        }
    }
}

unsafe fn translate(base: esp_event_base_t, id: i32, data: *mut c_void) -> Option<LinkEvent> {
    unsafe {
        if base == sys::IP_EVENT {
            match id as u32 {
                x if x == sys::ip_event_t_IP_EVENT_STA_GOT_IP as u32
                    || x == sys::ip_event_t_IP_EVENT_PPP_GOT_IP as u32 =>
                {
                    let got = &*data.cast::<ip_event_got_ip_t>();
                    Some(LinkEvent::GotAddress(IpInfo {
                        addr: ipv4(got.ip_info.ip.addr),
                        netmask: ipv4(got.ip_info.netmask.addr),
                        gateway: ipv4(got.ip_info.gw.addr),
                        dns: [
                            dns_server(got.esp_netif, sys::esp_netif_dns_type_t_ESP_NETIF_DNS_MAIN),
                            dns_server(got.esp_netif, sys::esp_netif_dns_type_t_ESP_NETIF_DNS_BACKUP),
                        ],
                    }))
                }
                x if x == sys::ip_event_t_IP_EVENT_STA_LOST_IP as u32
                    || x == sys::ip_event_t_IP_EVENT_PPP_LOST_IP as u32 =>
                {
                    Some(LinkEvent::LostAddress)
                }
                x if x == sys::ip_event_t_IP_EVENT_GOT_IP6 as u32 => {
                    let got = &*data.cast::<ip_event_got_ip6_t>();
                    Some(LinkEvent::GotIpv6(ipv6(got.ip6_info.ip.addr)))
                }
                _ => None,
            }
        } else if base == sys::NETIF_PPP_STATUS
            && id as u32 == sys::esp_netif_ppp_status_event_t_NETIF_PPP_ERRORUSER as u32
        {
            Some(LinkEvent::UserInterrupted)
        } else {
            None
        }
    }
}

/// lwIP stores addresses in network order in a native `u32`.
fn ipv4(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_le_bytes())
}

fn ipv6(raw: [u32; 4]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    for (chunk, word) in octets.chunks_exact_mut(4).zip(raw) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Ipv6Addr::from(octets)
}

unsafe fn dns_server(
    netif: *mut esp_netif_t,
    kind: sys::esp_netif_dns_type_t,
) -> Option<std::net::IpAddr> {
    if netif.is_null() {
        return None;
    }
    let mut info: esp_netif_dns_info_t = unsafe { core::mem::zeroed() };
    // SAFETY: `netif` comes from a live got-IP event; `info` is a plain
    // out-parameter.
    let ret = unsafe { esp_netif_get_dns_info(netif, kind, ptr::addr_of_mut!(info)) };
    if ret != ESP_OK as esp_err_t || info.ip.type_ != sys::ESP_IPADDR_TYPE_V4 as u8 {
        return None;
    }
    // SAFETY: `type_` says the union holds an IPv4 address.
    let addr = unsafe { info.ip.u_addr.ip4.addr };
    (addr != 0).then(|| ipv4(addr).into())
}
