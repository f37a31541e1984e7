//! Per-session cache of the most recent inbound local address (§4.D).
//!
//! Every UDP socket API capable of reporting the local destination address of an inbound
//! datagram (`quinn-udp`'s `RecvMeta::dst_ip`, the portable stand-in for `IP_PKTINFO` /
//! `IPV6_PKTINFO`) can fail to do so for a given datagram. When that happens we keep
//! whatever we last observed rather than falling back to no source pinning at all.

use std::net::IpAddr;

/// Folds a newly observed local address into the cache, keeping the previous value when
/// the new observation is absent.
pub fn update_oob_cache(prev: Option<IpAddr>, new: Option<IpAddr>) -> Option<IpAddr> {
    new.or(prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn none_observation_keeps_previous_value() {
        let prev = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(update_oob_cache(prev, None), prev);
    }

    #[test]
    fn some_observation_replaces_previous_value() {
        let prev = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        let new = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        assert_eq!(update_oob_cache(prev, new), new);
    }

    #[test]
    fn none_prev_and_none_new_stays_none() {
        assert_eq!(update_oob_cache(None, None), None);
    }
}
