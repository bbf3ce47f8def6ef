//! Profile parsing demonstration for rsapparmor
//! rsapparmor profile 解析演示程序
//! 功能说明：
//! 1. 解析命令行指定的 profile 文件（include 相对 profile 目录展开）
//! 2. 删除被 include 片段覆盖的重复规则
//! 3. 输出规范化后的 profile 文本
//!
//! 运行命令：
//! cargo run --example parse_profile -- /etc/apparmor.d/usr.bin.foo [/etc/apparmor.d] [config.json]

use env_logger::{Builder, Env, Target};
use rsapparmor::{ParseContext, ParserConfig, ProfileRegistry};
use std::{env, error::Error, time::Instant};

fn main() -> Result<(), Box<dyn Error>> {
    // ========== 1. 日志系统初始化 ==========
    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .init();

    // ========== 2. 参数与配置 ==========
    let mut args = env::args().skip(1);
    let profile_path = args
        .next()
        .ok_or("usage: parse_profile <profile-file> [profile-dir] [config.json]")?;
    let profile_dir = args.next();
    let config_file = args.next();

    let mut config = match config_file {
        Some(path) => ParserConfig::from_json_file(path)?,
        None => ParserConfig::default(),
    };
    if let Some(dir) = profile_dir {
        config.profile_dir = dir.into();
    }

    // ========== 3. 解析 ==========
    let start_instant = Instant::now();
    let mut ctx = ParseContext::new(config);
    let mut parsed = ctx.parse_profile_file(&profile_path)?;
    log::info!(
        "Parse finished | file: {} | profiles: {} | includes: {} | elapsed: {:?}",
        profile_path,
        parsed.profiles.len(),
        ctx.memo_len(),
        start_instant.elapsed()
    );

    // ========== 4. 注册与去重 ==========
    parsed.file.preamble.delete_duplicates().print_stats(&parsed.file.filename);
    let mut registry = ProfileRegistry::new();
    registry.add_parsed(&parsed)?;
    for (_, fragment) in ctx.fragments() {
        registry.add_fragment(fragment)?;
    }
    let include_files = ctx.included_files(&parsed.file.preamble.include);
    let variables = registry.get_all_merged_variables(&parsed.file.filename, &include_files)?;
    log::info!("Variables merged | defined: {} | extended: {}", variables.set.len(), variables.add.len());

    for scope in parsed.profiles.iter_mut() {
        let included = ctx.included_rules(&scope.rules.include);
        let stats = scope.delete_duplicates(Some(&included));
        log::info!("Profile cleaned | name: {} | removed: {}", scope.name, stats.removed());
    }

    // ========== 5. 输出规范化文本 ==========
    for line in parsed.get_clean() {
        println!("{}", line);
    }
    Ok(())
}
