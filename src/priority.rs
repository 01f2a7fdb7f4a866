/// Number of distinct packet priority levels.
pub const NUM_PRIORITIES: usize = 8;

/// Ethertype announcing an 802.1Q tag.
pub const VLAN_ETHERTYPE: u16 = 0x8100;

const VLAN_PRIO_SHIFT: u16 = 13;
const VLAN_TAG_PRESENT: u16 = 0x1000;

/// The PCP values stored in the tag are not ordered the way the transport's
///  priorities are: the link-layer standard treats PCP 0 as a middle priority
///  and PCP 1 as the lowest. This table maps transport priority (0 = lowest)
///  to the PCP slot with that rank. The swap of slots 0 and 1 is mandated by
///  the standard, not derivable, hence a table.
const PRIORITY_TO_PCP: [u16; NUM_PRIORITIES] = [1, 0, 2, 3, 4, 5, 6, 7];

/// An 802.1Q tag carrying a packet priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    tci: u16,
}

impl VlanTag {
    /// Build the tag for a transport priority in `0..NUM_PRIORITIES`.
    pub fn for_priority(priority: u8) -> VlanTag {
        VlanTag {
            tci: (PRIORITY_TO_PCP[priority as usize] << VLAN_PRIO_SHIFT) | VLAN_TAG_PRESENT,
        }
    }

    /// Raw tag control information, as written into the frame.
    pub fn tci(&self) -> u16 {
        self.tci
    }

    /// The PCP field of the tag (the link-layer's view of the priority).
    pub fn pcp(&self) -> u8 {
        (self.tci >> VLAN_PRIO_SHIFT) as u8 & 0x7
    }
}

impl Default for VlanTag {
    fn default() -> VlanTag {
        VlanTag::for_priority(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::lowest(0, 1)]
    #[case::second(1, 0)]
    #[case::two(2, 2)]
    #[case::five(5, 5)]
    #[case::highest(7, 7)]
    fn test_pcp_mapping(#[case] priority: u8, #[case] expected_pcp: u8) {
        let tag = VlanTag::for_priority(priority);
        assert_eq!(tag.pcp(), expected_pcp);
        assert_ne!(tag.tci() & VLAN_TAG_PRESENT, 0);
    }

    #[test]
    fn test_mapping_is_a_permutation() {
        let mut seen = [false; NUM_PRIORITIES];
        for priority in 0..NUM_PRIORITIES {
            seen[VlanTag::for_priority(priority as u8).pcp() as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
