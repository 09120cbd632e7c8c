// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Commit finishers. Each mutating handler journals its entry and parks one
//! of these on the sync barrier; the finisher applies the projected change to
//! the cache in journal order, marks objects dirty at the reserved version,
//! releases locks, notifies replicas, and sends the reply.

use crate::balancer::MetaPop;
use crate::cache::{DentryKey, DnState};
use crate::mds::Mds;
use crate::messenger::Messenger;
use crate::store::MetaStore;
use atoll_common::proto::{
    ClientMsg, MClientMountAck, MClientUnmount, Message, PeerMsg,
};
use atoll_common::state::{ClientInst, InodeId, ReqId, Version};
use log::{debug, info};

/// Variant-typed continuation records parked on journal sync.
#[derive(Debug)]
pub enum Finisher {
    Mount {
        client: ClientInst,
        mount: bool,
        cmapv: Version,
    },
    Utime {
        reqid: ReqId,
        ino: InodeId,
        pdv: Version,
        mtime: u64,
        atime: u64,
        ctime: u64,
    },
    Chmod {
        reqid: ReqId,
        ino: InodeId,
        pdv: Version,
        mode: u32,
        ctime: u64,
    },
    Chown {
        reqid: ReqId,
        ino: InodeId,
        pdv: Version,
        uid: i32,
        gid: i32,
        ctime: u64,
    },
    Truncate {
        reqid: ReqId,
        ino: InodeId,
        pdv: Version,
        size: u64,
        ctime: u64,
    },
    /// mknod / mkdir / symlink / open-create share one finisher; `open_after`
    /// routes openc into the open path once the inode is linked.
    Mknod {
        reqid: ReqId,
        dn: DentryKey,
        ino: InodeId,
        pv: Version,
        open_after: bool,
    },
    LinkLocal {
        reqid: ReqId,
        dn: DentryKey,
        target: InodeId,
        dpv: Version,
        tpdv: Version,
        tctime: u64,
    },
    UnlinkLocal {
        reqid: ReqId,
        dn: DentryKey,
        ino: InodeId,
        ipv: Version,
        ictime: u64,
        dpv: Version,
        remote: bool,
    },
    Rename {
        reqid: ReqId,
        src: DentryKey,
        dest: DentryKey,
        srci: InodeId,
        spv: Version,
        dpv: Version,
        /// Overwritten destination inode, if any.
        old: Option<InodeId>,
        ctime: u64,
    },
}

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    pub(crate) fn apply_finisher(&mut self, fin: Finisher) {
        match fin {
            Finisher::Mount {
                client,
                mount,
                cmapv,
            } => self.mount_finish(client, mount, cmapv),

            Finisher::Utime {
                reqid,
                ino,
                pdv,
                mtime,
                atime,
                ctime,
            } => {
                if let Some(inode) = self.cache.get_inode_mut(ino) {
                    inode.attr.mtime = mtime;
                    inode.attr.atime = atime;
                    inode.attr.ctime = ctime;
                    inode.mark_dirty(pdv);
                }
                self.inode_file_write_finish(ino, reqid);
                self.reply_request(reqid, 0, Some(ino));
            }

            Finisher::Chmod {
                reqid,
                ino,
                pdv,
                mode,
                ctime,
            } => {
                if let Some(inode) = self.cache.get_inode_mut(ino) {
                    inode.attr.mode &= !atoll_common::state::MODE_CHMOD_MASK;
                    inode.attr.mode |= mode & atoll_common::state::MODE_CHMOD_MASK;
                    inode.attr.ctime = ctime;
                    inode.mark_dirty(pdv);
                }
                self.inode_hard_write_finish(ino, reqid);
                self.reply_request(reqid, 0, Some(ino));
            }

            Finisher::Chown {
                reqid,
                ino,
                pdv,
                uid,
                gid,
                ctime,
            } => {
                if let Some(inode) = self.cache.get_inode_mut(ino) {
                    if uid >= 0 {
                        inode.attr.uid = uid as u32;
                    }
                    if gid >= 0 {
                        inode.attr.gid = gid as u32;
                    }
                    inode.attr.ctime = ctime;
                    inode.mark_dirty(pdv);
                }
                self.inode_hard_write_finish(ino, reqid);
                self.reply_request(reqid, 0, Some(ino));
            }

            Finisher::Truncate {
                reqid,
                ino,
                pdv,
                size,
                ctime,
            } => {
                if let Some(inode) = self.cache.get_inode_mut(ino) {
                    inode.attr.size = size;
                    inode.attr.ctime = ctime;
                    inode.mark_dirty(pdv);
                }
                self.inode_file_write_finish(ino, reqid);
                self.balancer.hit_inode(ino, MetaPop::IWr);
                self.reply_request(reqid, 0, Some(ino));
            }

            Finisher::Mknod {
                reqid,
                dn,
                ino,
                pv,
                open_after,
            } => self.mknod_finish(reqid, dn, ino, pv, open_after),

            Finisher::LinkLocal {
                reqid,
                dn,
                target,
                dpv,
                tpdv,
                tctime,
            } => self.link_local_finish(reqid, dn, target, dpv, tpdv, tctime),

            Finisher::UnlinkLocal {
                reqid,
                dn,
                ino,
                ipv,
                ictime,
                dpv,
                remote,
            } => self.unlink_local_finish(reqid, dn, ino, ipv, ictime, dpv, remote),

            Finisher::Rename {
                reqid,
                src,
                dest,
                srci,
                spv,
                dpv,
                old,
                ctime,
            } => self.rename_finish(reqid, src, dest, srci, spv, dpv, old, ctime),
        }
    }

    fn mount_finish(&mut self, client: ClientInst, mount: bool, cmapv: Version) {
        if mount {
            self.clientmap.add_mount(client.clone());
        } else {
            self.clientmap.rem_mount(client.id);
        }
        assert_eq!(
            cmapv,
            self.clientmap.version(),
            "client map version skew on mount apply"
        );

        if mount {
            let ack = MClientMountAck {
                client: client.clone(),
                mds_map_epoch: self.mds_map_epoch,
                osd_map_epoch: self.osd_map_epoch,
            };
            self.messenger
                .send_client(&client, ClientMsg::MountAck(ack));
        } else {
            // Ack by echoing the unmount back.
            self.messenger.send_client(
                &client,
                ClientMsg::UnmountAck(MClientUnmount {
                    client: client.clone(),
                }),
            );
            if self.conf.mds.shutdown_on_last_unmount && self.clientmap.is_empty() {
                info!("all clients done, initiating shutdown");
                self.shutdown_start();
            }
        }
    }

    fn mknod_finish(
        &mut self,
        reqid: ReqId,
        dn: DentryKey,
        ino: InodeId,
        pv: Version,
        open_after: bool,
    ) {
        debug!("mknod_finish {} ino {}", dn, ino);

        // Link the inode under its (null, xlocked) dentry.
        self.cache.link_inode(&dn, ino);
        if let Some(dentry) = self.cache.dentry_mut(&dn) {
            dentry.mark_dirty(pv);
        }
        if let Some(dir) = self.cache.get_dirfrag_mut(dn.df) {
            let v = dir.pre_dirty();
            dir.mark_dirty(v);
        }
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.mark_dirty(pv);
        }

        self.dentry_xlock_finish(&dn);
        self.balancer.hit_inode(ino, MetaPop::IWr);

        if open_after {
            self.handle_client_open_on(reqid, ino);
        } else {
            self.reply_request(reqid, 0, Some(ino));
        }
    }

    fn link_local_finish(
        &mut self,
        reqid: ReqId,
        dn: DentryKey,
        target: InodeId,
        dpv: Version,
        tpdv: Version,
        tctime: u64,
    ) {
        debug!("link_local_finish {} -> {}", dn, target);

        if let Some(dentry) = self.cache.dentry_mut(&dn) {
            dentry.state = DnState::Remote(target);
            dentry.mark_dirty(dpv);
        }
        if let Some(inode) = self.cache.get_inode_mut(target) {
            inode.attr.nlink += 1;
            inode.attr.ctime = tctime;
            inode.mark_dirty(tpdv);
        }

        self.dentry_xlock_finish(&dn);
        self.inode_hard_write_finish(target, reqid);
        self.balancer.hit_inode(target, MetaPop::IWr);
        self.reply_request(reqid, 0, Some(dn.df.ino));
    }

    #[allow(clippy::too_many_arguments)]
    fn unlink_local_finish(
        &mut self,
        reqid: ReqId,
        dn: DentryKey,
        ino: InodeId,
        ipv: Version,
        ictime: u64,
        dpv: Version,
        remote: bool,
    ) {
        debug!("unlink_local_finish {}", dn);

        if remote {
            if let Some(inode) = self.cache.get_inode_mut(ino) {
                inode.attr.ctime = ictime;
                inode.attr.nlink = inode.attr.nlink.saturating_sub(1);
                inode.mark_dirty(ipv);
            }
            self.inode_hard_write_finish(ino, reqid);
        } else if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.attr.nlink = inode.attr.nlink.saturating_sub(1);
            inode.mark_dirty(ipv);
            inode.parent = None;
        }

        // Unlink in cache; the dentry goes null and dirty.
        let replicas = self
            .cache
            .dentry(&dn)
            .map(|d| d.replicas.clone())
            .unwrap_or_default();
        if let Some(dentry) = self.cache.dentry_mut(&dn) {
            dentry.mark_dirty(dpv);
        }
        if let Some(dir) = self.cache.get_dirfrag_mut(dn.df) {
            dir.unlink_inode(&dn.name);
            let v = dir.pre_dirty();
            dir.mark_dirty(v);
        }

        // Share the unlink with replicas.
        for peer in replicas {
            self.messenger.send_peer(
                peer,
                Message::PeerLock(PeerMsg::DentryUnlink {
                    dirfrag: dn.df,
                    name: dn.name.clone(),
                }),
            );
        }

        self.dentry_xlock_finish(&dn);

        // Last link gone and nobody holds caps: purge and evict.
        let purge = self
            .cache
            .get_inode(ino)
            .map(|i| i.attr.nlink == 0 && !i.caps_wanted())
            .unwrap_or(false);
        if purge {
            if let Some(attr) = self.cache.get_inode(ino).map(|i| i.attr.clone()) {
                self.cache.purge_inode(&attr);
            }
            self.cache.remove_inode(ino);
        }

        self.balancer.hit_dir(dn.df);
        self.reply_request(reqid, 0, Some(dn.df.ino));
    }

    #[allow(clippy::too_many_arguments)]
    fn rename_finish(
        &mut self,
        reqid: ReqId,
        src: DentryKey,
        dest: DentryKey,
        srci: InodeId,
        spv: Version,
        dpv: Version,
        old: Option<InodeId>,
        ctime: u64,
    ) {
        debug!("rename_finish {} -> {}", src, dest);

        // Overwritten destination loses its last link.
        if let Some(oldino) = old {
            if let Some(inode) = self.cache.get_inode_mut(oldino) {
                inode.attr.nlink = inode.attr.nlink.saturating_sub(1);
            }
            let purge = self
                .cache
                .get_inode(oldino)
                .map(|i| i.attr.nlink == 0 && !i.caps_wanted())
                .unwrap_or(false);
            if purge {
                if let Some(attr) = self.cache.get_inode(oldino).map(|i| i.attr.clone()) {
                    self.cache.purge_inode(&attr);
                }
                self.cache.remove_inode(oldino);
            }
        }

        let src_state = self
            .cache
            .dentry(&src)
            .map(|d| d.state)
            .unwrap_or(DnState::Null);

        if let Some(dentry) = self.cache.dentry_mut(&src) {
            dentry.state = DnState::Null;
            dentry.mark_dirty(spv);
        }
        if let Some(dentry) = self.cache.dentry_mut(&dest) {
            dentry.state = src_state;
            dentry.mark_dirty(dpv);
        }
        for df in [src.df, dest.df] {
            if let Some(dir) = self.cache.get_dirfrag_mut(df) {
                let v = dir.pre_dirty();
                dir.mark_dirty(v);
            }
        }

        if let Some(inode) = self.cache.get_inode_mut(srci) {
            inode.attr.ctime = ctime;
            if matches!(src_state, DnState::Primary(_)) {
                inode.parent = Some(dest.clone());
            }
        }

        // Notify replicas of both dentries.
        let mut peers: Vec<_> = self
            .cache
            .dentry(&src)
            .map(|d| d.replicas.clone())
            .unwrap_or_default();
        for p in self
            .cache
            .dentry(&dest)
            .map(|d| d.replicas.clone())
            .unwrap_or_default()
        {
            if !peers.contains(&p) {
                peers.push(p);
            }
        }
        for peer in peers {
            self.messenger.send_peer(
                peer,
                Message::PeerLock(PeerMsg::RenameNotify {
                    src: src.df,
                    srcname: src.name.clone(),
                    dest: dest.df,
                    destname: dest.name.clone(),
                }),
            );
        }

        self.dentry_xlock_finish(&src);
        self.dentry_xlock_finish(&dest);
        self.reply_request(reqid, 0, Some(srci));
    }
}
