// 该文件是 Qingxu （情绪） 项目的一部分。
// src/lib.rs - 库主文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

pub mod analysis;
pub mod emotion;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 将 URL 路径解码为本地文件路径（处理 `%20` 等转义字符）
pub fn decode_url_path(url: &url::Url) -> String {
  match urlencoding::decode(url.path()) {
    Ok(path) => path.into_owned(),
    Err(_) => url.path().to_string(),
  }
}

/// 从 URL 查询参数中读取布尔开关，未指定时返回默认值
pub fn query_flag(url: &url::Url, key: &str, default: bool) -> bool {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| matches!(v.as_ref(), "" | "1" | "true" | "yes" | "on"))
    .unwrap_or(default)
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;
  use url::Url;

  #[test]
  fn test_decode_url_path_handles_escapes() {
    let url = Url::parse("image:///tmp/my%20photo.png").unwrap();
    assert_eq!(decode_url_path(&url), "/tmp/my photo.png");
  }

  #[rstest]
  #[case::absent("exec:///bin/true", false)]
  #[case::bare("exec:///bin/true?enforce_detection", true)]
  #[case::truthy("exec:///bin/true?enforce_detection=true", true)]
  #[case::numeric("exec:///bin/true?enforce_detection=1", true)]
  #[case::falsy("exec:///bin/true?enforce_detection=false", false)]
  fn test_query_flag(#[case] raw: &str, #[case] expected: bool) {
    let url = Url::parse(raw).unwrap();
    assert_eq!(query_flag(&url, "enforce_detection", false), expected);
  }
}
