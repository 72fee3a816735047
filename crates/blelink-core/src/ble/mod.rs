pub mod btleplug_radio;
pub mod radio;
pub mod registry;

pub use btleplug_radio::BtleplugRadio;
pub use radio::{CharacteristicNotification, RadioDriver, RadioError, RadioEvent};
pub use registry::PeripheralRegistry;

use uuid::Uuid;

/// 目标外设的广播名称，与固件约定一致
pub const TARGET_NAME: &str = "SAMPlE_BLE";
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x5476534d_1213_1212_1212_454e544f1212);
pub const READ_CHAR_UUID: Uuid = Uuid::from_u128(0x00105354_0000_1000_8000_00805f9b34fb);
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x00105352_0000_1000_8000_00805f9b34fb);

/// 1 米处的参考 RSSI，用于距离估算
const RSSI_AT_ONE_METER: f64 = -69.0;
/// 路径损耗指数（自由空间为 2）
const PATH_LOSS_EXPONENT: f64 = 2.0;

/// 扫描期间发现的外设
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeripheralDescriptor {
    /// 扫描会话内稳定的外设标识（设备地址）
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertised_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i16>,
}

impl PeripheralDescriptor {
    pub fn new(id: impl Into<String>, advertised_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            advertised_name,
            signal_strength: rssi,
        }
    }

    /// 广播名称是否等于 [`TARGET_NAME`]
    pub fn is_target(&self) -> bool {
        self.advertised_name.as_deref() == Some(TARGET_NAME)
    }

    /// 外设 ID 是否相同，地址字符串不区分大小写
    pub fn has_id(&self, peripheral_id: &str) -> bool {
        self.id.eq_ignore_ascii_case(peripheral_id)
    }

    /// 显示用名称，未解析时为 `<unknown>`
    pub fn display_name(&self) -> &str {
        self.advertised_name.as_deref().unwrap_or("<unknown>")
    }

    /// 根据 RSSI 粗略估算距离（米）
    ///
    /// 使用对数距离路径损耗模型：`10 ^ ((-69 - rssi) / 20)`。
    /// RSSI 缺失或为 0（部分平台表示未知）时返回 `None`。
    pub fn estimated_distance_m(&self) -> Option<f64> {
        match self.signal_strength {
            Some(rssi) if rssi != 0 => Some(10f64.powf(
                (RSSI_AT_ONE_METER - rssi as f64) / (10.0 * PATH_LOSS_EXPONENT),
            )),
            _ => None,
        }
    }

    /// 距离的展示文本，例如 `1.41 m`，无法估算时为 `N/A`
    pub fn distance_label(&self) -> String {
        self.estimated_distance_m()
            .map(|d| format!("{:.2} m", d))
            .unwrap_or_else(|| "N/A".to_string())
    }
}
