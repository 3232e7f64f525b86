#[cfg(target_os = "espidf")]
fn main() {
    // ESP-IDF 运行时初始化（链接补丁 & 日志）
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("GEMS LTE bridge booting (ESP-IDF)...");

    if let Err(err) = gems_lte_bridge::board::run() {
        log::error!("Board init failed: {:?}", err);
    }

    // 不退出也不自行复位
    loop {
        esp_idf_hal::delay::FreeRtos::delay_ms(1000);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("gems-lte-bridge only runs on ESP-IDF targets");
}
