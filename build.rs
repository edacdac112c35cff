// Copyright © 2020 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::process::Command;

fn main() {
    // Outside a git checkout `git describe` fails; the package version is
    // reported instead.
    let version = Command::new("git")
        .args(["describe", "--dirty"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("v{}", env!("CARGO_PKG_VERSION")));

    // Sets BUILT_VERSION for src/main.rs.
    println!("cargo:rustc-env=BUILT_VERSION={version}");
}
