//! 外设注册表
//!
//! 以外设 ID 为键保存扫描到的目标外设。同一扫描窗口内重复的广播包只会
//! 原地更新已有条目，不会产生重复项。

use crate::ble::PeripheralDescriptor;
use std::collections::HashMap;

/// 按插入顺序保存的外设表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeripheralRegistry {
    entries: Vec<PeripheralDescriptor>,
    index: HashMap<String, usize>,
}

impl PeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// 插入或更新条目
    ///
    /// 已知 ID 只更新名称和信号强度；新的广播包未携带这两项时保留旧值。
    /// 返回 `true` 表示新插入。
    pub fn upsert(&mut self, descriptor: PeripheralDescriptor) -> bool {
        match self.index.get(&descriptor.id) {
            Some(&pos) => {
                let entry = &mut self.entries[pos];
                if descriptor.advertised_name.is_some() {
                    entry.advertised_name = descriptor.advertised_name;
                }
                if descriptor.signal_strength.is_some() {
                    entry.signal_strength = descriptor.signal_strength;
                }
                false
            }
            None => {
                self.index
                    .insert(descriptor.id.clone(), self.entries.len());
                self.entries.push(descriptor);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&PeripheralDescriptor> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    /// 当前所有条目的快照
    pub fn values(&self) -> Vec<PeripheralDescriptor> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
