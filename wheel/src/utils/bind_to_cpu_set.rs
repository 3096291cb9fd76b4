/// Error type returned by [`bind_to_cpu_set`].
pub type BindError<T> = nix::Result<T>;

/// Pins the calling thread to the given set of CPUs.
pub fn bind_to_cpu_set(cpus: impl IntoIterator<Item = usize>) -> BindError<()> {
    let mut cpuset = nix::sched::CpuSet::new();
    for cpu in cpus {
        cpuset.set(cpu)?;
    }
    let pid = nix::unistd::Pid::from_raw(0);
    nix::sched::sched_setaffinity(pid, &cpuset)
}
