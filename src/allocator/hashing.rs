//! 键哈希与分组定位
//!
//! 两个函数都是纯函数：同一 `(key, block_length, group_sizes)` 在任意副本、任意构建上结果相同。

/// 计算键所在的块：`crc32(key) % block_length`
///
/// `block_length` 必须大于 0（由 `ServiceConfig` 保证）。
#[inline]
pub fn bucket_of(key: &str, block_length: u32) -> u32 {
    crc32fast::hash(key.as_bytes()) % block_length
}

/// 根据块号选择分组
///
/// 块号先按比例映射到成员空间 `bucket * total / block_length`，
/// 再落到第一个累计边界大于该位置的分组。大小为 0 的分组永远不会被选中。
/// 没有成员时返回 `None`。
pub fn group_for_bucket(bucket: u32, block_length: u32, group_sizes: &[usize]) -> Option<usize> {
    let total: usize = group_sizes.iter().sum();
    if total == 0 || block_length == 0 {
        return None;
    }

    let bucket = u128::from(bucket % block_length);
    let position = (bucket * total as u128 / u128::from(block_length)) as usize;

    let mut boundary = 0usize;
    for (group, size) in group_sizes.iter().enumerate() {
        boundary += size;
        if boundary > position {
            return Some(group);
        }
    }
    None
}

/// 组合：键 → 分组
pub fn group_for_key(key: &str, block_length: u32, group_sizes: &[usize]) -> Option<usize> {
    group_for_bucket(bucket_of(key, block_length), block_length, group_sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_crc32() {
        // crc32("123456789") = 0xCBF43926
        assert_eq!(bucket_of("123456789", u32::MAX), 0xCBF4_3926 % u32::MAX);
        assert_eq!(bucket_of("123456789", 4), 0xCBF4_3926 % 4);
    }

    #[test]
    fn bucket_stays_below_block_length() {
        for i in 0..1000 {
            let key = format!("user-{}", i);
            assert!(bucket_of(&key, 7) < 7);
        }
    }

    #[test]
    fn buckets_map_proportionally_to_groups() {
        // 7 个成员分成 [2, 2, 3]，块长度 7 时块号与成员位置一一对应
        let sizes = [2, 2, 3];
        let groups: Vec<usize> = (0..7)
            .map(|b| group_for_bucket(b, 7, &sizes).unwrap())
            .collect();
        assert_eq!(groups, vec![0, 0, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn empty_groups_are_never_chosen() {
        let sizes = [0, 3, 0, 1];
        for bucket in 0..1024 {
            let group = group_for_bucket(bucket, 1024, &sizes).unwrap();
            assert!(group == 1 || group == 3, "bucket {} -> group {}", bucket, group);
        }
    }

    #[test]
    fn no_members_no_group() {
        assert_eq!(group_for_bucket(3, 16, &[]), None);
        assert_eq!(group_for_bucket(3, 16, &[0, 0]), None);
    }

    #[test]
    fn block_length_equal_to_group_count_is_modulo() {
        let sizes = [1, 1, 1, 1];
        for i in 0..200 {
            let key = format!("k{}", i);
            let expected = (crc32fast::hash(key.as_bytes()) % 4) as usize;
            assert_eq!(group_for_key(&key, 4, &sizes), Some(expected));
        }
    }
}
