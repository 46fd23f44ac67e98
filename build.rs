fn main() {
    // Build-time configuration (see `TrackerConfig::from_build_env`).
    for key in [
        "TRACKER_BROKER_URL",
        "TRACKER_MESSAGE_PERIOD",
        "TRACKER_LINK",
        "TRACKER_WIFI_SSID",
        "TRACKER_WIFI_PASSWORD",
        "TRACKER_MODEM_APN",
        "TRACKER_MODEM_DEVICE",
        "TRACKER_SIM_PIN",
        "TRACKER_UART_TX",
        "TRACKER_UART_RX",
        "TRACKER_UART_RTS",
        "TRACKER_UART_CTS",
        "TRACKER_UART_FLOW_CONTROL",
    ] {
        println!("cargo:rerun-if-env-changed={key}");
    }

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
