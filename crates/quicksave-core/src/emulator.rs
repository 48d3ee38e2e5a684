//! Emulator registry: static per-emulator path conventions and limits.
//!
//! Save/state directories are templates relative to the device roots the
//! engine is constructed with; `{core}` and `{title_id}` are substituted at
//! resolution time. Multi-core front-ends keep per-core subdirectories.

use std::path::{Path, PathBuf};

/// Path conventions and limits for one supported emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub id: &'static str,
    /// Installed package names this emulator is known under
    pub packages: &'static [&'static str],
    /// Save directory template, relative to the save root
    pub save_dir: &'static str,
    /// Save file extension (without dot)
    pub save_ext: &'static str,
    /// State directory template, relative to the state root
    pub state_dir: &'static str,
    /// Fixed slot count, or -1 for unbounded (derive from usage)
    pub max_slots: i32,
    /// Saves live under per-title directories keyed by platform title id
    pub uses_title_id: bool,
}

const EMULATORS: &[EmulatorConfig] = &[
    EmulatorConfig {
        id: "retroarch",
        packages: &["com.retroarch", "com.retroarch.aarch64"],
        save_dir: "RetroArch/saves/{core}",
        save_ext: "srm",
        state_dir: "RetroArch/states/{core}",
        max_slots: -1,
        uses_title_id: false,
    },
    EmulatorConfig {
        id: "mupen64plus",
        packages: &["org.mupen64plusae.v3.fzurita"],
        save_dir: "mupen64plus/GameSaves",
        save_ext: "sra",
        state_dir: "mupen64plus/GameStates",
        max_slots: 10,
        uses_title_id: false,
    },
    EmulatorConfig {
        id: "duckstation",
        packages: &["com.github.stenzek.duckstation"],
        save_dir: "duckstation/memcards",
        save_ext: "mcd",
        state_dir: "duckstation/savestates",
        max_slots: 10,
        uses_title_id: false,
    },
    EmulatorConfig {
        id: "melonds",
        packages: &["me.magnum.melonds"],
        save_dir: "melonDS/saves",
        save_ext: "sav",
        state_dir: "melonDS/states",
        max_slots: 8,
        uses_title_id: false,
    },
    EmulatorConfig {
        id: "azahar",
        packages: &["io.github.azahar_emu.azahar"],
        save_dir: "azahar/sdmc/{title_id}",
        save_ext: "sav",
        state_dir: "azahar/states",
        max_slots: 10,
        uses_title_id: true,
    },
];

/// Look up an emulator by its internal id.
#[must_use]
pub fn get(id: &str) -> Option<&'static EmulatorConfig> {
    EMULATORS.iter().find(|e| e.id == id)
}

/// Resolve an installed package name to its emulator config.
#[must_use]
pub fn resolve_package(package: &str) -> Option<&'static EmulatorConfig> {
    EMULATORS.iter().find(|e| e.packages.contains(&package))
}

impl EmulatorConfig {
    /// Save directory for a game, or `None` when the template needs a title
    /// id that isn't known yet.
    #[must_use]
    pub fn save_dir_for(
        &self,
        save_root: &Path,
        core_id: Option<&str>,
        title_id: Option<&str>,
    ) -> Option<PathBuf> {
        let rendered = render_template(self.save_dir, core_id, title_id)?;
        Some(save_root.join(rendered))
    }

    /// Default save file name for a ROM.
    #[must_use]
    pub fn save_file_name(&self, rom_base_name: &str) -> String {
        format!("{rom_base_name}.{}", self.save_ext)
    }

    /// State directory, core-aware for multi-core front-ends.
    #[must_use]
    pub fn state_dir_for(&self, state_root: &Path, core_id: Option<&str>) -> Option<PathBuf> {
        let rendered = render_template(self.state_dir, core_id, None)?;
        Some(state_root.join(rendered))
    }

    /// Slot file name for a ROM: `.state` for slot 0, `.state<N>` for
    /// numbered slots, `.state.auto` for the emulator's auto slot.
    #[must_use]
    pub fn state_file_name(&self, rom_base_name: &str, slot: i32) -> String {
        match slot {
            s if s < 0 => format!("{rom_base_name}.state.auto"),
            0 => format!("{rom_base_name}.state"),
            s => format!("{rom_base_name}.state{s}"),
        }
    }

    /// Parse the slot number out of a state file name for the given ROM, or
    /// `None` if the file doesn't follow this emulator's slot convention.
    #[must_use]
    pub fn parse_state_slot(&self, file_name: &str, rom_base_name: &str) -> Option<i32> {
        let prefix = format!("{rom_base_name}.state");
        let suffix = file_name.strip_prefix(&prefix)?;
        match suffix {
            "" => Some(0),
            ".auto" => Some(-1),
            digits => digits.parse::<i32>().ok().filter(|s| *s > 0),
        }
    }

    /// Screenshot sidecar name for a state file.
    #[must_use]
    pub fn screenshot_file_name(&self, state_file_name: &str) -> String {
        format!("{state_file_name}.png")
    }
}

fn render_template(
    template: &str,
    core_id: Option<&str>,
    title_id: Option<&str>,
) -> Option<String> {
    let mut rendered = template.to_string();
    if rendered.contains("{core}") {
        rendered = rendered.replace("{core}", core_id?);
    }
    if rendered.contains("{title_id}") {
        rendered = rendered.replace("{title_id}", title_id?);
    }
    Some(rendered)
}
