use core::ffi::c_void;

use anyhow::anyhow;
use esp_idf_svc::bt::{BtClassic, BtDriver};
use esp_idf_svc::hal::modem::BluetoothModemPeripheral;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::{self, esp};
use log::{info, warn};

use pantry_common::provision::MESSAGE_MAX_LEN;
use pantry_common::{Mailbox, RadioControl};

const SPP_SERVER_NAME: &core::ffi::CStr = c"PANTRY_IO_SERVER";
const DEVICE_NAME: &core::ffi::CStr = c"PANTRY_IO_BT";

/// Latest inbound provisioning message. Written by the SPP data callback,
/// drained by the provisioning session; an unread message is overwritten.
static INBOUND: Mailbox<String> = Mailbox::new();

pub fn inbound() -> &'static Mailbox<String> {
    &INBOUND
}

/// Radio lifecycle owned by [`Bluetooth`]. The stack can be brought up once
/// per boot; after shutdown, provisioning requires a reboot. Ongoing
/// discoverability is a security exposure, so there is no re-enable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioLifecycle {
    Uninitialized,
    Active,
    ShutDown,
}

pub struct Bluetooth<'d> {
    driver: Option<BtDriver<'d, BtClassic>>,
    lifecycle: RadioLifecycle,
}

impl<'d> Bluetooth<'d> {
    pub fn new() -> Self {
        Self {
            driver: None,
            lifecycle: RadioLifecycle::Uninitialized,
        }
    }

    pub fn lifecycle(&self) -> RadioLifecycle {
        self.lifecycle
    }

    /// Brings up the controller and bluedroid for Classic BT and starts the
    /// SPP acceptor. Pairing uses SSP numeric confirmation with a variable
    /// PIN fallback, handled entirely in the GAP callback.
    pub fn enable<M: BluetoothModemPeripheral>(
        &mut self,
        modem: impl Peripheral<P = M> + 'd,
        nvs: EspDefaultNvsPartition,
    ) -> anyhow::Result<()> {
        match self.lifecycle {
            RadioLifecycle::Uninitialized => {}
            RadioLifecycle::Active => return Ok(()),
            RadioLifecycle::ShutDown => {
                return Err(anyhow!("bluetooth is shut down; reboot to provision again"));
            }
        }

        let driver = BtDriver::<BtClassic>::new(modem, Some(nvs))?;

        unsafe {
            esp!(sys::esp_bt_gap_register_callback(Some(gap_callback)))?;
            esp!(sys::esp_spp_register_callback(Some(spp_callback)))?;
            esp!(sys::esp_spp_init(sys::esp_spp_mode_t_ESP_SPP_MODE_CB))?;

            let mut iocap: sys::esp_bt_io_cap_t = sys::esp_bt_io_cap_t_ESP_BT_IO_CAP_IO;
            esp!(sys::esp_bt_gap_set_security_param(
                sys::esp_bt_sp_param_t_ESP_BT_SP_IOCAP_MODE,
                &mut iocap as *mut _ as *mut c_void,
                1,
            ))?;

            let mut pin_code: sys::esp_bt_pin_code_t = [0; 16];
            esp!(sys::esp_bt_gap_set_pin(
                sys::esp_bt_pin_type_t_ESP_BT_PIN_TYPE_VARIABLE,
                0,
                pin_code.as_mut_ptr(),
            ))?;
        }

        self.driver = Some(driver);
        self.lifecycle = RadioLifecycle::Active;
        info!("bluetooth provisioning channel active as `PANTRY_IO_BT`");
        Ok(())
    }
}

impl RadioControl for Bluetooth<'_> {
    fn shutdown(&mut self) {
        if self.lifecycle != RadioLifecycle::Active {
            return;
        }

        if let Err(err) = unsafe { esp!(sys::esp_spp_deinit()) } {
            warn!("spp deinit failed: {err}");
        }
        // Dropping the driver disables bluedroid and the controller.
        self.driver = None;
        self.lifecycle = RadioLifecycle::ShutDown;
        info!("bluetooth disabled; reboot to provision again");
    }
}

unsafe extern "C" fn spp_callback(
    event: sys::esp_spp_cb_event_t,
    param: *mut sys::esp_spp_cb_param_t,
) {
    match event {
        sys::esp_spp_cb_event_t_ESP_SPP_INIT_EVT => {
            if (*param).init.status == sys::esp_spp_status_t_ESP_SPP_SUCCESS {
                sys::esp_spp_start_srv(
                    sys::esp_spp_sec_t_ESP_SPP_SEC_AUTHENTICATE,
                    sys::esp_spp_role_t_ESP_SPP_ROLE_SLAVE,
                    0,
                    SPP_SERVER_NAME.as_ptr(),
                );
            } else {
                warn!("spp init failed: {}", (*param).init.status);
            }
        }
        sys::esp_spp_cb_event_t_ESP_SPP_START_EVT => {
            if (*param).start.status == sys::esp_spp_status_t_ESP_SPP_SUCCESS {
                sys::esp_bt_dev_set_device_name(DEVICE_NAME.as_ptr());
                sys::esp_bt_gap_set_scan_mode(
                    sys::esp_bt_connection_mode_t_ESP_BT_CONNECTABLE,
                    sys::esp_bt_discovery_mode_t_ESP_BT_GENERAL_DISCOVERABLE,
                );
            } else {
                warn!("spp server start failed: {}", (*param).start.status);
            }
        }
        sys::esp_spp_cb_event_t_ESP_SPP_SRV_OPEN_EVT => {
            info!("provisioning client connected");
        }
        sys::esp_spp_cb_event_t_ESP_SPP_CLOSE_EVT => {
            info!("provisioning client disconnected");
        }
        sys::esp_spp_cb_event_t_ESP_SPP_DATA_IND_EVT => {
            let data_ind = &(*param).data_ind;
            let len = data_ind.len as usize;
            // Oversized messages are dropped whole; a truncated credential
            // must never reach the parser.
            if len < MESSAGE_MAX_LEN {
                let bytes = core::slice::from_raw_parts(data_ind.data, len);
                INBOUND.publish(String::from_utf8_lossy(bytes).into_owned());
            } else {
                warn!("dropping oversized provisioning message ({len} bytes)");
            }
        }
        _ => {}
    }
}

unsafe extern "C" fn gap_callback(
    event: sys::esp_bt_gap_cb_event_t,
    param: *mut sys::esp_bt_gap_cb_param_t,
) {
    match event {
        sys::esp_bt_gap_cb_event_t_ESP_BT_GAP_AUTH_CMPL_EVT => {
            let auth = &(*param).auth_cmpl;
            if auth.stat == sys::esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                info!("pairing authenticated");
            } else {
                warn!("pairing failed, status: {}", auth.stat);
            }
        }
        sys::esp_bt_gap_cb_event_t_ESP_BT_GAP_CFM_REQ_EVT => {
            let cfm = &mut (*param).cfm_req;
            info!("confirm numeric value: {}", cfm.num_val);
            sys::esp_bt_gap_ssp_confirm_reply(cfm.bda.as_mut_ptr(), true);
        }
        sys::esp_bt_gap_cb_event_t_ESP_BT_GAP_PIN_REQ_EVT => {
            let pin_req = &mut (*param).pin_req;
            let mut pin_code: sys::esp_bt_pin_code_t = [0; 16];
            if pin_req.min_16_digit {
                info!("legacy pairing pin: 0000 0000 0000 0000");
                sys::esp_bt_gap_pin_reply(pin_req.bda.as_mut_ptr(), true, 16, pin_code.as_mut_ptr());
            } else {
                info!("legacy pairing pin: 1234");
                pin_code[..4].copy_from_slice(b"1234");
                sys::esp_bt_gap_pin_reply(pin_req.bda.as_mut_ptr(), true, 4, pin_code.as_mut_ptr());
            }
        }
        _ => {}
    }
}
