// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # httpdbase 独立服务器
//!
//! 读取 `config/development.toml`（或第一个命令行参数指定的文件），启动服务器，
//! 然后在标准输入上运行一个简单的管理控制台：
//! - `stop`   停止服务器并退出
//! - `status` 查看运行状态
//! - `help`   显示帮助

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use httpdbase::{
    logger::ConsoleLogger, Config, Httpd, TemplatableAdapter, TemplateHandler,
};

const DEFAULT_CONFIG: &str = "config/development.toml";
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    // 日志优先使用 log4rs 的 YAML 配置，缺失时退回控制台输出
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        if let Err(e2) = ConsoleLogger::stderr(false).install() {
            eprintln!("无法初始化日志：{}，{}", e, e2);
        }
        warn!("无法加载log4rs配置：{}，使用控制台日志", e);
    }

    let config = match Config::from_toml(&config_path) {
        Ok(c) => {
            info!("配置文件{}已载入", config_path);
            c
        }
        Err(e) => {
            warn!("{}，使用默认配置", e);
            Config::new()
        }
    };
    info!("home: {}", config.home().display());

    let mut httpd = Httpd::new(config);
    let templates = Arc::new(TemplateHandler::with_processor(Arc::new(TemplatableAdapter)));
    httpd.add_handler("st", templates.clone());
    httpd.add_post_handler(".st", templates);

    let addr = match httpd.start() {
        Ok(addr) => addr,
        Err(e) => {
            error!("服务器启动失败：{}", e);
            std::process::exit(1);
        }
    };
    println!("服务器已在{}上启动，输入help查看可用命令", addr);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("读取标准输入失败：{}", e);
                break;
            }
        };
        match line.trim() {
            "stop" => break,
            "status" => {
                println!("== httpdbase 状态 ==");
                println!("状态：{:?}", httpd.state());
                if let Some(addr) = httpd.local_addr() {
                    println!("监听地址：{}", addr);
                }
                println!("已处理请求数：{}", httpd.request_count());
                println!("====================");
            }
            "help" => {
                println!("== httpdbase 帮助 ==");
                println!("stop   - 停止服务器并退出");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "" => {}
            other => println!("无效的命令：{}", other),
        }
    }

    if let Err(e) = httpd.stop(STOP_TIMEOUT) {
        error!("停止服务器时出错：{}", e);
    }
    println!("服务器已停止");
}
