//! BLE Link CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::Result;
use blelink_core::ConnectionSnapshot;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blelink", version, about = "BLE Link - 目标外设连接与读写工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 查看连接状态和已发现的外设
    Status,
    /// 开始一个扫描周期
    Scan,
    /// 提前结束扫描
    StopScan,
    /// 连接目标外设
    Connect {
        /// 外设 ID (可选，不指定则连接信号最强的外设)
        peripheral: Option<String>,
    },
    /// 读取特征值
    Read {
        /// 外设 ID
        peripheral: String,
    },
    /// 无应答写入特征值
    Write {
        /// 外设 ID
        peripheral: String,
        /// 要写入的数据
        data: String,
        /// 把数据按十六进制解析
        #[arg(long)]
        hex: bool,
    },
    /// 断开连接
    Disconnect {
        /// 外设 ID
        peripheral: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let resp = client::send_request(client::IpcRequest::Status).await?;
            if let client::IpcResponse::Status {
                is_scanning,
                is_connected,
                connected_peripheral,
                peripherals,
            } = resp
            {
                let snapshot = ConnectionSnapshot {
                    is_connected,
                    is_scanning,
                    peripherals,
                    connected_peripheral,
                };
                print_status(&snapshot);
            }
        }
        Commands::Scan => {
            println!("🔍 扫描目标外设...");
            client::send_request(client::IpcRequest::Scan).await?;
        }
        Commands::StopScan => {
            client::send_request(client::IpcRequest::StopScan).await?;
        }
        Commands::Connect { peripheral } => {
            match &peripheral {
                Some(id) => println!("🔗 连接: {}", id),
                None => println!("🔗 连接信号最强的外设"),
            }
            client::send_request(client::IpcRequest::Connect {
                peripheral_id: peripheral,
            })
            .await?;
        }
        Commands::Read { peripheral } => {
            let resp = client::send_request(client::IpcRequest::Read {
                peripheral_id: peripheral,
            })
            .await?;
            if let client::IpcResponse::Value { data_hex } = resp {
                println!("📥 {}", data_hex);
                if let Some(text) = hex::decode(&data_hex)
                    .ok()
                    .and_then(|b| String::from_utf8(b).ok())
                {
                    println!("   \"{}\"", text);
                }
            }
        }
        Commands::Write {
            peripheral,
            data,
            hex: is_hex,
        } => {
            let data_hex = if is_hex {
                data
            } else {
                hex::encode(data.as_bytes())
            };
            println!("📤 写入: {}", data_hex);
            client::send_request(client::IpcRequest::Write {
                peripheral_id: peripheral,
                data_hex,
            })
            .await?;
        }
        Commands::Disconnect { peripheral } => {
            println!("⏹️  断开: {}", peripheral);
            client::send_request(client::IpcRequest::Disconnect {
                peripheral_id: peripheral,
            })
            .await?;
        }
    }

    Ok(())
}

fn print_status(snapshot: &ConnectionSnapshot) {
    let state = if snapshot.is_connected {
        "已连接"
    } else if snapshot.is_scanning {
        "扫描中"
    } else {
        "空闲"
    };
    println!("状态: {}", state);

    let devices = snapshot.device_list();
    if devices.is_empty() {
        println!("   未发现设备");
        return;
    }
    for (i, dev) in devices.iter().enumerate() {
        let marker = if snapshot.connected_peripheral.as_ref() == Some(dev) {
            "*"
        } else {
            " "
        };
        println!(
            "  {}[{}] {} ({}) 距离: {}",
            marker,
            i,
            dev.display_name(),
            dev.id,
            dev.distance_label()
        );
    }
}
