//! Demo entry point: wires up the name service and every server in
//! `mkcore`, then runs through one instance of each of the design's
//! testable scenarios against the live actors before idling.

use mkcore::config::Config;
use mkcore::message::Pid;
use mkcore::naming::NameClient;
use mkcore::rmem::RmemClient;
use mkcore::shm::{Mode as ShmMode, OpenFlags as ShmOpenFlags, ShmClient};
use mkcore::vfs::{Identity, Minix, OpenFlags as VfsOpenFlags, VfsClient, Whence};

fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::default();
    let (names, _names_handle) = NameClient::spawn();

    let (rmem, _rmem_handle) =
        RmemClient::spawn_registered(0, config.rmem_num_blocks, &names, 0, 1);
    tracing::info!("rmem server registered at /rmem0");

    let shm = ShmClient::spawn_local(config.shm_max, config.shm_name_max, config.shm_size_max, rmem.clone());
    names.link("/shm", 0, 2).expect("shm name registration");
    tracing::info!("shm server registered at /shm");

    let fs = Minix::mkfs(config.disk_size, config.nr_inodes, 64, 0, 0).expect("mkfs");
    let vfs = VfsClient::spawn_local(fs, config.nr_inodes, config.nr_files).expect("vfs mount");
    names.link("/vfs", 0, 3).expect("vfs name registration");
    tracing::info!("vfs server registered at /vfs");

    demo_rmem(&rmem);
    demo_shm(&shm, &rmem);
    demo_vfs(&vfs);

    tracing::info!("demo scenarios complete, shutting down");
    vfs.exit();
    shm.exit();
    rmem.exit();
    names.exit();
}

fn demo_rmem(rmem: &RmemClient) {
    let pid: Pid = 1;
    let page = rmem.alloc(pid).expect("rmem alloc");
    rmem.write(pid, page, vec![1u8; mkcore::rmem::RMEM_BLOCK_SIZE]).expect("rmem write");
    let data = rmem.read(page).expect("rmem read");
    assert_eq!(data, vec![1u8; mkcore::rmem::RMEM_BLOCK_SIZE]);
    rmem.free(pid, page).expect("rmem free");
    tracing::info!("rmem scenario ok");
}

fn demo_shm(shm: &ShmClient, rmem: &RmemClient) {
    let owner: Pid = 1;
    let other: Pid = 2;
    let shmid = shm
        .create(owner, "demo", ShmOpenFlags::O_CREAT, ShmMode::S_IWUSR)
        .expect("shm create");
    shm.ftruncate(shmid, mkcore::rmem::RMEM_BLOCK_SIZE).expect("shm ftruncate");
    shm.write(rmem, owner, shmid, vec![7u8; mkcore::rmem::RMEM_BLOCK_SIZE])
        .expect("shm write");
    let shmid2 = shm.open(other, "demo", ShmOpenFlags::O_RDONLY).expect("shm open");
    let buf = shm.read(rmem, shmid2).expect("shm read");
    assert_eq!(buf, vec![7u8; mkcore::rmem::RMEM_BLOCK_SIZE]);
    shm.unlink(owner, "demo").expect("shm unlink");
    shm.close(shmid).expect("shm close owner");
    shm.close(shmid2).expect("shm close other");
    tracing::info!("shm scenario ok");
}

fn demo_vfs(vfs: &VfsClient) {
    let id = Identity {
        uid: 0,
        gid: 0,
        is_superuser: true,
    };
    let fd = vfs
        .open(id, "/demo", VfsOpenFlags::O_RDWR | VfsOpenFlags::O_CREAT, 0o600, 0)
        .expect("vfs open");
    vfs.write(fd, vec![9u8; 1024]).expect("vfs write");
    vfs.seek(fd, 0, Whence::Set).expect("vfs seek");
    let buf = vfs.read(fd, 1024).expect("vfs read");
    assert_eq!(buf, vec![9u8; 1024]);
    vfs.close(fd).expect("vfs close");
    vfs.unlink(id, "/demo").expect("vfs unlink");
    tracing::info!("vfs scenario ok");
}
