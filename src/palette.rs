// 该文件是 Moran （墨染） 项目的一部分。
// src/palette.rs - 类别调色板
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::sync::Mutex;

/// 固定调色板，按类别索引取模循环使用
const PALETTE: [&str; 20] = [
  "#FF3838",
  "#FF9D97",
  "#FF701F",
  "#FFB21D",
  "#CFD231",
  "#48F90A",
  "#92CC17",
  "#3DDB86",
  "#1A9334",
  "#00D4BB",
  "#2C99A8",
  "#00C2FF",
  "#344593",
  "#6473FF",
  "#0018EC",
  "#8438FF",
  "#520085",
  "#CB38FF",
  "#FF95C8",
  "#FF37C7",
];

/// 类别调色板
///
/// 同一个类别索引在进程生命周期内始终返回相同的颜色。
/// 内部缓存加锁，允许多个检测任务共享同一个调色板实例。
pub struct Palette {
  cache: Mutex<HashMap<usize, &'static str>>,
}

impl Default for Palette {
  fn default() -> Self {
    Self::new()
  }
}

impl Palette {
  pub fn new() -> Self {
    Palette {
      cache: Mutex::new(HashMap::new()),
    }
  }

  /// 获取类别索引对应的十六进制颜色
  pub fn get(&self, index: usize) -> &'static str {
    let mut cache = self.cache.lock().unwrap();
    *cache
      .entry(index)
      .or_insert_with(|| PALETTE[index % PALETTE.len()])
  }
}

/// 将 "#RRGGBB" 形式的颜色和 8 位透明度展开成 RGBA 四元组
pub fn hex_to_rgba(hex: &str, alpha: u8) -> Option<[u8; 4]> {
  let hex = hex.strip_prefix('#').unwrap_or(hex);
  if hex.len() != 6 || !hex.is_ascii() {
    return None;
  }

  let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
  let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
  let b = u8::from_str_radix(&hex[4..6], 16).ok()?;

  Some([r, g, b, alpha])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_palette_deterministic() {
    let palette = Palette::new();
    let first = palette.get(3);
    for _ in 0..10 {
      assert_eq!(palette.get(3), first);
    }
  }

  #[test]
  fn test_palette_cycles() {
    let palette = Palette::new();
    assert_eq!(palette.get(0), palette.get(PALETTE.len()));
    assert_eq!(palette.get(7), PALETTE[7]);
  }

  #[test]
  fn test_hex_to_rgba() {
    assert_eq!(hex_to_rgba("#FF3838", 120), Some([255, 56, 56, 120]));
    assert_eq!(hex_to_rgba("00C2FF", 255), Some([0, 194, 255, 255]));
  }

  #[test]
  fn test_hex_to_rgba_invalid() {
    assert_eq!(hex_to_rgba("#FF38", 120), None);
    assert_eq!(hex_to_rgba("#GGGGGG", 120), None);
  }
}
