use std::collections::HashMap;

use nix::unistd::{Gid, Group, Uid, User};

use crate::archive::Link;

/// Resolves numeric user and group ids to names.
///
/// Lookups are done once per id and kept for the lifetime of the cache, ids without a name
/// resolve to their decimal representation.
#[derive(Debug, Default)]
pub struct IdCache {
    users: HashMap<i64, String>,
    groups: HashMap<i64, String>,
}

impl IdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner of `link`, numeric or as user name.
    pub fn get_user(&mut self, link: &Link, numeric: bool) -> String {
        let uid = link.uid();
        if numeric {
            return uid.to_string();
        }

        self.users
            .entry(uid)
            .or_insert_with(|| lookup_user(uid).unwrap_or_else(|| uid.to_string()))
            .clone()
    }

    /// Group of `link`, numeric or as group name.
    pub fn get_group(&mut self, link: &Link, numeric: bool) -> String {
        let gid = link.gid();
        if numeric {
            return gid.to_string();
        }

        self.groups
            .entry(gid)
            .or_insert_with(|| lookup_group(gid).unwrap_or_else(|| gid.to_string()))
            .clone()
    }
}

fn lookup_user(uid: i64) -> Option<String> {
    let uid = u32::try_from(uid).ok()?;
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(user) => user.map(|user| user.name),
        Err(err) => {
            log::debug!("failed to look up user {uid} - {err}");
            None
        }
    }
}

fn lookup_group(gid: i64) -> Option<String> {
    let gid = u32::try_from(gid).ok()?;
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(group) => group.map(|group| group.name),
        Err(err) => {
            log::debug!("failed to look up group {gid} - {err}");
            None
        }
    }
}
