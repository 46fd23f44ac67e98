//! PPP network interface over the modem UART.
//!
//! ```text
//!  lwIP ──transmit()──▶ SerialPort::write_all ──▶ UART ──▶ modem
//!  lwIP ◀─esp_netif_receive── rx pump thread ◀── UART ◀── modem
//! ```
//!
//! The netif raises `IP_EVENT_PPP_GOT_IP` once IPCP completes; that event
//! reaches the gate through [`super::ip_events`].

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread::JoinHandle;

use esp_idf_svc::sys::{
    self, esp_err_t, esp_netif_action_start, esp_netif_attach, esp_netif_config_t,
    esp_netif_destroy, esp_netif_driver_base_t, esp_netif_driver_ifconfig_t, esp_netif_new,
    esp_netif_receive, esp_netif_set_driver_config, esp_netif_t, ESP_FAIL, ESP_OK,
};
use log::{error, info, warn};

use crate::error::LinkError;
use crate::task::{self, Core, TaskSpec};

use super::at::SerialPort;

const RX_POLL: Duration = Duration::from_millis(20);
const RX_BUF: usize = 512;

const PPP_RX_TASK: TaskSpec = TaskSpec {
    name: "ppp-rx\0",
    core: Core::Pro,
    priority: 18,
    stack_kb: 4,
};

/// Driver object handed to esp-netif.  `base` must stay the first field.
#[repr(C)]
struct PppDriver<P: SerialPort> {
    base: esp_netif_driver_base_t,
    port: Arc<P>,
}

struct NetifHandle(*mut esp_netif_t);

// SAFETY: esp-netif handles may be used from any task.
unsafe impl Send for NetifHandle {}
unsafe impl Sync for NetifHandle {}

pub struct PppNetif {
    netif: Arc<NetifHandle>,
    running: Arc<AtomicBool>,
    rx: Option<JoinHandle<()>>,
    // Referenced by the netif until it is destroyed in `drop`.
    _driver: Box<dyn core::any::Any>,
}

impl PppNetif {
    pub fn start<P: SerialPort + 'static>(port: Arc<P>) -> Result<Self, LinkError> {
        let mut driver = Box::new(PppDriver {
            base: esp_netif_driver_base_t {
                post_attach: Some(post_attach::<P>),
                netif: ptr::null_mut(),
            },
            port: Arc::clone(&port),
        });

        // SAFETY: the inherent/stack configs are static IDF tables; the
        // driver box outlives the netif (destroyed first in `drop`).
        let netif = unsafe {
            let cfg = esp_netif_config_t {
                base: ptr::addr_of!(sys::_g_esp_netif_inherent_ppp_config),
                driver: ptr::null(),
                stack: sys::_g_esp_netif_netstack_default_ppp,
            };
            let netif = esp_netif_new(&cfg);
            if netif.is_null() {
                error!("PPP: esp_netif_new failed");
                return Err(LinkError::InitFailed);
            }
            let ret = esp_netif_attach(netif, ptr::addr_of_mut!(*driver).cast());
            if ret != ESP_OK as esp_err_t {
                error!("PPP: attach failed ({})", ret);
                esp_netif_destroy(netif);
                return Err(LinkError::InitFailed);
            }
            esp_netif_action_start(netif.cast(), ptr::null(), 0, ptr::null_mut());
            netif
        };

        let netif = Arc::new(NetifHandle(netif));
        let running = Arc::new(AtomicBool::new(true));
        let rx = {
            let netif = Arc::clone(&netif);
            let running = Arc::clone(&running);
            task::spawn_on_core(PPP_RX_TASK, move || rx_pump(&*port, &netif, &running))
                .map_err(|e| {
                    error!("PPP: rx task spawn failed: {}", e);
                    LinkError::InitFailed
                })?
        };
        info!("PPP: netif started");

        Ok(Self {
            netif,
            running,
            rx: Some(rx),
            _driver: driver,
        })
    }
}

impl Drop for PppNetif {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(rx) = self.rx.take() {
            let _ = rx.join();
        }
        // SAFETY: the rx task has exited; nothing else uses the handle.
        unsafe { esp_netif_destroy(self.netif.0) };
        info!("PPP: netif destroyed");
    }
}

fn rx_pump<P: SerialPort>(port: &P, netif: &NetifHandle, running: &AtomicBool) {
    let mut buf = [0u8; RX_BUF];
    while running.load(Ordering::Acquire) {
        match port.read(&mut buf, RX_POLL) {
            Ok(0) => {}
            Ok(n) => {
                // SAFETY: `buf[..n]` is initialised; lwIP copies the data.
                let ret = unsafe {
                    esp_netif_receive(netif.0, buf.as_mut_ptr().cast(), n, ptr::null_mut())
                };
                if ret != ESP_OK as esp_err_t {
                    warn!("PPP: receive dropped {} bytes ({})", n, ret);
                }
            }
            Err(e) => warn!("PPP: UART read failed: {}", e),
        }
    }
}

unsafe extern "C" fn post_attach<P: SerialPort>(
    netif: *mut esp_netif_t,
    handle: *mut c_void,
) -> esp_err_t {
    // SAFETY: `handle` is the `PppDriver<P>` passed to `esp_netif_attach`.
    unsafe {
        let driver = handle.cast::<PppDriver<P>>();
        (*driver).base.netif = netif;
        let ifconfig = esp_netif_driver_ifconfig_t {
            handle,
            transmit: Some(transmit::<P>),
            ..Default::default()
        };
        esp_netif_set_driver_config(netif, &ifconfig)
    }
}

unsafe extern "C" fn transmit<P: SerialPort>(
    handle: *mut c_void,
    buffer: *mut c_void,
    len: usize,
) -> esp_err_t {
    // SAFETY: lwIP hands a valid frame of `len` bytes; `handle` is ours.
    unsafe {
        let driver = &*handle.cast::<PppDriver<P>>();
        let frame = core::slice::from_raw_parts(buffer.cast::<u8>(), len);
        match driver.port.write_all(frame) {
            Ok(()) => ESP_OK as esp_err_t,
            Err(_) => ESP_FAIL as esp_err_t,
        }
    }
}
